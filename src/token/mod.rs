//! Token lifecycle: create, validate, revoke.
//!
//! Secrets are formatted as `hg_<owner_prefix><random>`; only the SHA-256
//! hash is stored and the plaintext is returned exactly once at creation.
//! Every token is also registered as its own object identity so its ACL can
//! carry scope restrictions (see the façade's token overlay).

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::acl::ResourceAclService;
use crate::domain::{Principal, ResourceKind, ShadowResource, Token, TokenKind};
use crate::infra::{AuthzError, Result, TokenStore};

/// Token secret prefix.
pub const TOKEN_SECRET_PREFIX: &str = "hg_";

/// A freshly minted token together with its one-time plaintext secret.
#[derive(Debug, Clone)]
pub struct CreatedToken {
    pub token: Token,
    pub secret: String,
}

/// Token lifecycle service.
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    token_acl: Arc<ResourceAclService>,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>, token_acl: Arc<ResourceAclService>) -> Self {
        Self { store, token_acl }
    }

    /// Hash a plaintext secret for storage/lookup.
    pub fn hash_secret(secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Generate a new plaintext secret with an owner hint prefix.
    fn generate_secret(owner: &Uuid) -> String {
        use rand::Rng;
        let random_bytes: [u8; 24] = rand::thread_rng().gen();
        let random_part = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        );
        let owner_prefix = &owner.to_string()[..8];
        format!("{TOKEN_SECRET_PREFIX}{owner_prefix}{random_part}")
    }

    /// Mint a token for `owner`. The owner receives ADMINISTRATION on the
    /// token's own ACL; the token stays unscoped until explicit permission
    /// entries replace that grant.
    pub async fn create(
        &self,
        owner: &Principal,
        kind: TokenKind,
        ttl_seconds: Option<i64>,
    ) -> Result<CreatedToken> {
        let id = Uuid::new_v4();
        let secret = Self::generate_secret(&owner.user_id);
        let token = Token {
            id,
            owner: owner.user_id,
            kind,
            secret_hash: Self::hash_secret(&secret),
            expires_at: ttl_seconds.map(|ttl| Utc::now().timestamp() + ttl),
            enabled: true,
        };
        self.store.insert(&token).await?;

        let shadow = ShadowResource {
            kind: ResourceKind::Token,
            uuid: id,
            owner: owner.user_id,
            parent: None,
            revision: Utc::now().timestamp(),
            deleted: false,
        };
        self.token_acl.register(&shadow, owner).await?;

        Ok(CreatedToken { token, secret })
    }

    /// Resolve a plaintext secret to its token. Valid ⇔ the hash matches a
    /// stored token that is enabled and not expired.
    pub async fn validate(&self, secret: &str) -> Result<Token> {
        if !secret.starts_with(TOKEN_SECRET_PREFIX) {
            return Err(AuthzError::TokenInvalid);
        }
        let hash = Self::hash_secret(secret);
        let token = self
            .store
            .find_by_hash(&hash)
            .await?
            .ok_or(AuthzError::TokenInvalid)?;

        if !token.enabled {
            return Err(AuthzError::TokenInvalid);
        }
        if !token.is_valid_at(Utc::now()) {
            return Err(AuthzError::TokenExpired(token.id));
        }
        Ok(token)
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<Token>> {
        self.store.get(id).await
    }

    pub async fn list_for_owner(&self, owner: &Uuid) -> Result<Vec<Token>> {
        self.store.list_for_owner(owner).await
    }

    /// Disable a token without deleting its ACL.
    pub async fn revoke(&self, id: &Uuid) -> Result<bool> {
        self.store.set_enabled(id, false).await
    }

    /// Delete a token and cascade its scope ACL.
    pub async fn delete(&self, id: &Uuid) -> Result<bool> {
        let removed = self.store.delete(id).await?;
        if removed {
            self.token_acl.unregister(*id).await?;
        }
        Ok(removed)
    }
}
