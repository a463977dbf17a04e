//! Core domain types for the HiveGrid authorization service.
//!
//! - [`permission`] - the closed permission vocabulary and its bitmask mapping
//! - [`resource`] - resource kinds, object identities, ACL records, shadows
//! - [`principal`] - principal references (SIDs) and caller context
//! - [`token`] - API token entities

pub mod permission;
pub mod principal;
pub mod resource;
pub mod token;

pub use permission::{Permission, ALL_PERMISSIONS};
pub use principal::{Principal, Sid};
pub use resource::{AccessControlEntry, AclRecord, ObjectIdentity, ResourceKind, ShadowResource};
pub use token::{Token, TokenKind};
