//! The hierarchical ACL authorization engine.
//!
//! - [`manager`] - CRUD + check primitives over the ACL store, with
//!   idempotent creation and retry/backoff for races
//! - [`resource`] - per-resource-kind ACL services (default permissions,
//!   recursive check, bootstrap)
//! - [`facade`] - the single entry point consumed by API controllers

pub mod facade;
pub mod manager;
pub mod resource;

pub use facade::{AuthorizationRequest, AuthorizationResponse, AuthorizationService};
pub use manager::AclManager;
pub use resource::{ResourceAclPolicy, ResourceAclService};
