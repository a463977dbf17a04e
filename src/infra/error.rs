//! Error types for the authorization service.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::ObjectIdentity;

/// Errors that can occur in the authorization engine and its stores.
#[derive(Error, Debug)]
pub enum AuthzError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// ACL row missing. Internal "no grant" signal; checks translate this
    /// into a deny, it is never surfaced to callers.
    #[error("acl not found: {0}")]
    AclNotFound(ObjectIdentity),

    /// ACE references a principal the store has not mirrored yet. Happens
    /// when default-permission bootstrap races user sync; retryable.
    #[error("sid not loaded: {0}")]
    SidNotLoaded(Uuid),

    /// Lost a creation race (unique-constraint violation on the object
    /// identity or an ACE). Retryable; the next attempt sees the winner's row.
    #[error("acl race: {0}")]
    AclRace(String),

    /// Shadow row missing for an externally-owned resource.
    #[error("shadow resource not found: {kind}/{id}")]
    ShadowNotFound { kind: String, id: Uuid },

    /// Unknown user referenced by a sync call.
    #[error("user not found: {0}")]
    UserNotFound(Uuid),

    /// Unknown parent referenced by a sync call.
    #[error("parent not found: {0}")]
    ParentNotFound(Uuid),

    /// Sync payload is older than the stored shadow row. Rejected so a
    /// stale update cannot resurrect a deleted resource.
    #[error("stale sync for {kind}/{id}: incoming revision {incoming} <= stored {stored}")]
    StaleSync {
        kind: String,
        id: Uuid,
        incoming: i64,
        stored: i64,
    },

    /// Caller lacks the rights to perform the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Permission label outside the closed vocabulary.
    #[error("unknown permission: {0}")]
    UnknownPermission(String),

    /// Resource kind outside the closed vocabulary.
    #[error("unknown resource kind: {0}")]
    UnknownResourceKind(String),

    /// Token not found, disabled, or secret mismatch.
    #[error("invalid token")]
    TokenInvalid,

    /// Token past its expiry.
    #[error("token expired: {0}")]
    TokenExpired(Uuid),

    /// Request payload failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// True for the designated "manager" error kinds that are worth
    /// retrying: creation races, unloaded SIDs, and transient database
    /// failures. Everything else propagates immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthzError::AclRace(_) | AuthzError::SidNotLoaded(_) => true,
            AuthzError::Database(e) => is_retryable_db_error(e),
            _ => false,
        }
    }
}

/// Result type for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Check if a raw sqlx error is transient.
pub fn is_retryable_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) => true,
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::PoolClosed => false,
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().unwrap_or_default();
            // PostgreSQL serialization failure / deadlock / connection loss
            code == "40001" || code == "40P01" || code.starts_with("08")
        }
        _ => false,
    }
}

/// Map a sqlx error raised while inserting ACL rows to the manager error
/// vocabulary: unique violations are creation races, foreign-key violations
/// mean the SID's principal row has not synced yet.
pub fn map_acl_write_error(err: sqlx::Error, sid_hint: Option<Uuid>) -> AuthzError {
    if let sqlx::Error::Database(ref db_err) = err {
        match db_err.kind() {
            sqlx::error::ErrorKind::UniqueViolation => {
                return AuthzError::AclRace(db_err.message().to_string());
            }
            sqlx::error::ErrorKind::ForeignKeyViolation => {
                if let Some(sid) = sid_hint {
                    return AuthzError::SidNotLoaded(sid);
                }
                return AuthzError::AclRace(db_err.message().to_string());
            }
            _ => {}
        }
    }
    AuthzError::Database(err)
}
