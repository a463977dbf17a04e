//! Common test utilities and fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use sqlx::SqlitePool;
use uuid::Uuid;

use hivegrid_authz::acl::{
    AclManager, AuthorizationService, ResourceAclPolicy, ResourceAclService,
};
use hivegrid_authz::domain::{Principal, ResourceKind, ShadowResource};
use hivegrid_authz::infra::sqlite::{
    connect_in_memory, SqliteAclStore, SqliteShadowStore, SqliteTokenStore,
};
use hivegrid_authz::infra::{RetryConfig, ShadowStore, TokenStore};
use hivegrid_authz::sync::{EventConsumer, SyncService};
use hivegrid_authz::token::TokenService;

/// Test owner user
pub fn alice() -> Uuid {
    Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap()
}

/// Second regular user
pub fn bob() -> Uuid {
    Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap()
}

/// Super-admin user
pub fn root() -> Uuid {
    Uuid::parse_str("33333333-3333-3333-3333-333333333333").unwrap()
}

/// Disabled user
pub fn mallory() -> Uuid {
    Uuid::parse_str("44444444-4444-4444-4444-444444444444").unwrap()
}

/// Fully wired service graph over an in-memory SQLite database.
pub struct TestEnv {
    pub pool: SqlitePool,
    pub shadows: Arc<dyn ShadowStore>,
    pub token_store: Arc<dyn TokenStore>,
    pub manager: Arc<AclManager>,
    pub devices: Arc<ResourceAclService>,
    pub apps: Arc<ResourceAclService>,
    pub token_acl: Arc<ResourceAclService>,
    pub trees: Arc<ResourceAclService>,
    pub facade: Arc<AuthorizationService>,
    pub sync: Arc<SyncService>,
    pub consumer: Arc<EventConsumer>,
    pub tokens: Arc<TokenService>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let pool = connect_in_memory().await.expect("sqlite pool");
        hivegrid_authz::migrations::run_sqlite(&pool)
            .await
            .expect("migrations");

        let shadows: Arc<dyn ShadowStore> = Arc::new(SqliteShadowStore::new(pool.clone()));
        let token_store: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::new(pool.clone()));
        let manager = Arc::new(
            AclManager::new(Arc::new(SqliteAclStore::new(pool.clone())))
                .with_retry_config(RetryConfig::fast()),
        );

        let service = |policy: ResourceAclPolicy| {
            Arc::new(
                ResourceAclService::new(policy, manager.clone())
                    .with_retry_config(RetryConfig::fast()),
            )
        };
        let devices = service(ResourceAclPolicy::device());
        let apps = service(ResourceAclPolicy::app());
        let token_acl = service(ResourceAclPolicy::token());
        let trees = service(ResourceAclPolicy::tree());

        let facade = Arc::new(AuthorizationService::new(
            devices.clone(),
            apps.clone(),
            token_acl.clone(),
            trees.clone(),
            shadows.clone(),
        ));
        let sync = Arc::new(SyncService::new(shadows.clone(), facade.clone()));
        let consumer = Arc::new(EventConsumer::new(sync.clone(), shadows.clone()));
        let tokens = Arc::new(TokenService::new(token_store.clone(), token_acl.clone()));

        Self {
            pool,
            shadows,
            token_store,
            manager,
            devices,
            apps,
            token_acl,
            trees,
            facade,
            sync,
            consumer,
            tokens,
        }
    }

    /// Mirror a user principal and return it.
    pub async fn seed_user(&self, user_id: Uuid, enabled: bool, super_admin: bool) -> Principal {
        let principal = Principal {
            user_id,
            enabled,
            super_admin,
        };
        self.shadows
            .upsert_principal(&principal)
            .await
            .expect("seed principal");
        principal
    }

    /// Seed the standard cast: alice (owner), bob (user), root (super-admin),
    /// mallory (disabled).
    pub async fn seed_standard_users(&self) -> (Principal, Principal, Principal, Principal) {
        (
            self.seed_user(alice(), true, false).await,
            self.seed_user(bob(), true, false).await,
            self.seed_user(root(), true, true).await,
            self.seed_user(mallory(), false, false).await,
        )
    }
}

/// Authorization request builder for façade tests.
pub fn request(
    permission: &str,
    kind: &str,
    object_id: Option<Uuid>,
) -> hivegrid_authz::acl::AuthorizationRequest {
    hivegrid_authz::acl::AuthorizationRequest {
        permission: permission.to_string(),
        kind: kind.to_string(),
        object_id,
        user_id: None,
        token_id: None,
    }
}

/// Asserts a Result is Ok and unwraps it.
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => panic!("expected Ok, got Err: {e}"),
        }
    };
}

/// Asserts a Result matches the expected error pattern.
#[macro_export]
macro_rules! assert_err {
    ($expr:expr, $pattern:pat) => {
        match $expr {
            Ok(_) => panic!("expected Err, got Ok"),
            Err(e) => assert!(
                matches!(e, $pattern),
                "unexpected error variant: {e}"
            ),
        }
    };
}

/// Shadow resource builder with sane defaults.
pub fn shadow(
    kind: ResourceKind,
    id: Uuid,
    owner: Uuid,
    parent: Option<Uuid>,
    revision: i64,
) -> ShadowResource {
    ShadowResource {
        kind,
        uuid: id,
        owner,
        parent,
        revision,
        deleted: false,
    }
}

pub fn device_shadow(id: Uuid, owner: Uuid, revision: i64) -> ShadowResource {
    shadow(ResourceKind::Device, id, owner, None, revision)
}
