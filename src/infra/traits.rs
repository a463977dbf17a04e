//! Store contracts for the authorization engine.
//!
//! Implementations exist for PostgreSQL (production) and SQLite (local
//! development and tests). All contracts are read-fresh: the engine never
//! caches ACL contents between calls.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

use crate::domain::{AclRecord, ObjectIdentity, Principal, ResourceKind, ShadowResource, Token};

use super::Result;

/// Persistence contract for object identities, ACLs and ACEs.
///
/// Invariants enforced by the store:
/// - one ACL row per object identity
/// - at most one ACE per (object identity, sid, permission)
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AclStore: Send + Sync {
    /// Load the ACL for an object identity. `None` when no grant has been
    /// recorded yet; the ACL row is created lazily on first grant.
    async fn load(&self, object: &ObjectIdentity) -> Result<Option<AclRecord>>;

    /// Create an empty ACL row. Losing a creation race surfaces as
    /// [`AuthzError::AclRace`](crate::infra::AuthzError::AclRace).
    async fn create(&self, object: &ObjectIdentity) -> Result<AclRecord>;

    /// Persist the ACL: replaces the entry list and the parent link in one
    /// transaction.
    async fn save(&self, acl: &AclRecord) -> Result<()>;

    /// Remove the ACL, its entries, and the object identity row.
    async fn delete(&self, object: &ObjectIdentity) -> Result<()>;
}

/// Persistence contract for shadow rows mirroring externally-owned resources,
/// plus the principal mirror used to resolve caller context.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ShadowStore: Send + Sync {
    /// Insert or update a shadow row. The write only applies when the
    /// incoming revision is not older than the stored one; stale payloads
    /// surface as [`AuthzError::StaleSync`](crate::infra::AuthzError::StaleSync).
    /// A tombstoned row requires a strictly newer revision to resurrect.
    async fn upsert(&self, shadow: &ShadowResource) -> Result<ShadowResource>;

    /// Fetch a live (non-tombstoned) shadow row.
    async fn get(&self, kind: ResourceKind, id: &Uuid) -> Result<Option<ShadowResource>>;

    /// Tombstone a shadow row at the given revision. Returns false when no
    /// live row existed; a newer stored revision rejects the delete as stale.
    async fn mark_deleted(&self, kind: ResourceKind, id: &Uuid, revision: i64) -> Result<bool>;

    /// Resolve a mirrored principal.
    async fn principal(&self, user_id: &Uuid) -> Result<Option<Principal>>;

    /// Insert or update a principal mirror row.
    async fn upsert_principal(&self, principal: &Principal) -> Result<()>;
}

/// Persistence contract for API tokens.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<()>;

    async fn get(&self, id: &Uuid) -> Result<Option<Token>>;

    /// Credential lookup by the hex-encoded SHA-256 of the secret.
    async fn find_by_hash(&self, secret_hash: &str) -> Result<Option<Token>>;

    async fn list_for_owner(&self, owner: &Uuid) -> Result<Vec<Token>>;

    /// Enable/disable a token. Returns false when the token does not exist.
    async fn set_enabled(&self, id: &Uuid, enabled: bool) -> Result<bool>;

    /// Delete a token row. Returns false when the token does not exist.
    async fn delete(&self, id: &Uuid) -> Result<bool>;
}
