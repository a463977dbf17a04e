//! Per-resource-kind ACL services.
//!
//! One service type parameterized by a [`ResourceAclPolicy`] replaces a
//! subclass-per-kind hierarchy: the policy injects the default permissions,
//! the owner-administration rule, and whether checks walk the parent chain.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::domain::{ObjectIdentity, Permission, Principal, ResourceKind, ShadowResource, Sid};
use crate::infra::{AuthzError, Result, Retry, RetryConfig};

use super::AclManager;

/// Upper bound on the parent walk; stops pathological cycles in parent links.
const MAX_PARENT_DEPTH: usize = 16;

/// Default-permission and hierarchy policy for one resource kind.
#[derive(Debug, Clone)]
pub struct ResourceAclPolicy {
    pub kind: ResourceKind,
    /// Granted to the owner at bootstrap.
    pub default_permissions: Vec<Permission>,
    /// Whether the owner additionally receives ADMINISTRATION when the
    /// registering caller is the owner (or an admin acting for them).
    pub owner_administration: bool,
    /// Whether checks recurse through the ACL parent chain.
    pub hierarchical: bool,
}

impl ResourceAclPolicy {
    pub fn device() -> Self {
        Self {
            kind: ResourceKind::Device,
            default_permissions: vec![Permission::Read, Permission::Write],
            owner_administration: true,
            hierarchical: true,
        }
    }

    /// Apps have no parent; grants are group/role driven.
    pub fn app() -> Self {
        Self {
            kind: ResourceKind::App,
            default_permissions: vec![Permission::Read, Permission::Pull, Permission::Subscribe],
            owner_administration: false,
            hierarchical: false,
        }
    }

    /// Tokens carry only the owner's ADMINISTRATION grant; explicit scope
    /// entries are added later through the management API.
    pub fn token() -> Self {
        Self {
            kind: ResourceKind::Token,
            default_permissions: vec![],
            owner_administration: true,
            hierarchical: false,
        }
    }

    /// Tree nodes behave like devices.
    pub fn tree() -> Self {
        Self {
            kind: ResourceKind::Tree,
            default_permissions: vec![Permission::Read, Permission::Write],
            owner_administration: true,
            hierarchical: true,
        }
    }

    pub fn for_kind(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Device => Self::device(),
            ResourceKind::App => Self::app(),
            ResourceKind::Token => Self::token(),
            ResourceKind::Tree => Self::tree(),
        }
    }
}

/// ACL operations for one resource kind.
pub struct ResourceAclService {
    policy: ResourceAclPolicy,
    manager: Arc<AclManager>,
    retry_config: RetryConfig,
}

impl ResourceAclService {
    pub fn new(policy: ResourceAclPolicy, manager: Arc<AclManager>) -> Self {
        Self {
            policy,
            manager,
            retry_config: RetryConfig::acl_bootstrap(),
        }
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.policy.kind
    }

    fn object_identity(&self, id: Uuid) -> ObjectIdentity {
        ObjectIdentity::new(self.policy.kind, id)
    }

    pub async fn add(&self, id: Uuid, sid: &Sid, permission: Permission) -> Result<()> {
        self.manager
            .add_permission(&self.object_identity(id), sid, permission)
            .await
    }

    pub async fn set(&self, id: Uuid, sid: &Sid, permissions: &[Permission]) -> Result<()> {
        self.manager
            .set_permissions(&self.object_identity(id), sid, permissions)
            .await
    }

    pub async fn list(&self, id: Uuid, sid: &Sid) -> Result<Vec<Permission>> {
        self.manager
            .get_permission_list(&self.object_identity(id), sid)
            .await
    }

    pub async fn remove(&self, id: Uuid, sid: &Sid, permission: Permission) -> Result<()> {
        self.manager
            .remove_permission(&self.object_identity(id), sid, permission)
            .await
    }

    pub async fn is_granted(&self, id: Uuid, sid: &Sid, permission: Permission) -> bool {
        self.manager
            .is_permission_granted(&self.object_identity(id), sid, permission)
            .await
    }

    /// Remove the resource's ACL entirely (cascade on resource deletion).
    pub async fn unregister(&self, id: Uuid) -> Result<()> {
        self.manager.delete_acl(&self.object_identity(id)).await
    }

    /// The authorization decision for (resource, user, permission).
    ///
    /// Deny on a missing user or permission, and on a missing resource unless
    /// the permission is LIST (which never names a concrete resource).
    /// Super-admins bypass ACL contents entirely; disabled users are denied
    /// even with an explicit grant. An ADMINISTRATION grant anywhere on the
    /// resource or its ancestors implies every permission.
    pub async fn check(
        &self,
        resource: Option<Uuid>,
        user: Option<&Principal>,
        permission: Option<Permission>,
    ) -> bool {
        let Some(user) = user else { return false };
        let Some(permission) = permission else {
            return false;
        };
        if resource.is_none() && permission != Permission::List {
            return false;
        }
        if user.super_admin {
            return true;
        }
        if !user.enabled {
            return false;
        }

        // LIST with no concrete resource: any enabled authenticated user.
        let Some(resource) = resource else {
            return true;
        };

        let sid = user.sid();
        let mut current = self.object_identity(resource);
        for depth in 0..MAX_PARENT_DEPTH {
            if self
                .manager
                .is_permission_granted(&current, &sid, Permission::Administration)
                .await
            {
                return true;
            }
            if self
                .manager
                .is_permission_granted(&current, &sid, permission)
                .await
            {
                return true;
            }
            if !self.policy.hierarchical {
                return false;
            }
            match self.manager.parent_of(&current).await {
                Ok(Some(parent)) => current = parent,
                Ok(None) => return false,
                Err(e) => {
                    warn!(object = %current, depth, error = %e,
                        "parent lookup failed during check, denying");
                    return false;
                }
            }
        }
        warn!(resource = %resource, "parent chain exceeded max depth, denying");
        false
    }

    /// One-time default-grant bootstrap for a newly synced resource.
    ///
    /// Guarded by "no existing ACE for the owner" rather than a hard
    /// uniqueness constraint, so the whole unit is retried; re-running is
    /// safe because grants are insert-if-missing. ADMINISTRATION is added
    /// only when the registering caller is the owner (or a super-admin
    /// syncing on the owner's behalf).
    pub async fn register(&self, resource: &ShadowResource, acting: &Principal) -> Result<()> {
        Retry::new(self.retry_config.clone())
            .run_with_predicate(
                "acl.register",
                || self.register_once(resource, acting),
                AuthzError::is_retryable,
            )
            .await
            .into_result()
    }

    async fn register_once(&self, resource: &ShadowResource, acting: &Principal) -> Result<()> {
        let object = resource.object_identity();
        let owner = Sid(resource.owner);
        let parent = if self.policy.hierarchical {
            resource.parent_identity()
        } else {
            None
        };

        let existing = self.manager.get_permission_list(&object, &owner).await?;
        if existing.is_empty() {
            let mut defaults = self.policy.default_permissions.clone();
            if self.policy.owner_administration
                && (acting.user_id == resource.owner || acting.super_admin)
            {
                defaults.push(Permission::Administration);
            }
            self.manager
                .add_permissions(&object, &owner, &defaults)
                .await?;
        }
        // Keep the parent link fresh on every sync.
        self.manager.set_parent(&object, parent).await
    }
}
