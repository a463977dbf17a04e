//! Infrastructure layer for the authorization service.
//!
//! Contains the error vocabulary, the retry combinator wrapping racy ACL
//! operations, the store contracts, and their PostgreSQL/SQLite
//! implementations.

mod error;
pub mod postgres;
mod retry;
pub mod sqlite;
mod traits;

pub use error::{is_retryable_db_error, map_acl_write_error, AuthzError, Result};
pub use postgres::{PgAclStore, PgShadowStore, PgTokenStore};
pub use retry::{Retry, RetryConfig, RetryResult};
pub use sqlite::{SqliteAclStore, SqliteShadowStore, SqliteTokenStore};
pub use traits::{AclStore, ShadowStore, TokenStore};

#[cfg(test)]
pub use traits::{MockAclStore, MockShadowStore, MockTokenStore};
