//! HiveGrid Authz Library
//!
//! Hierarchical ACL authorization service for the HiveGrid IoT platform:
//! permission checks, shadow-resource sync, and token-scoped grants.
//!
//! ## Modules
//!
//! - [`domain`] - Core domain types (permissions, principals, resources, tokens)
//! - [`infra`] - Infrastructure implementations (PostgreSQL, SQLite, retry)
//! - [`acl`] - ACL manager, per-kind resource services, authorization façade
//! - [`sync`] - Shadow-resource consistency protocol (direct + event-driven)
//! - [`token`] - Access-token lifecycle and scope ACLs
//! - [`auth`] - Service-to-service authentication (service keys)
//! - [`api`] - REST API routes
//! - [`server`] - HTTP server bootstrap

pub mod acl;
pub mod api;
pub mod auth;
pub mod domain;
pub mod infra;
pub mod migrations;
pub mod server;
pub mod sync;
pub mod token;

// Re-export commonly used types
pub use domain::{
    AccessControlEntry, AclRecord, ObjectIdentity, Permission, Principal, ResourceKind,
    ShadowResource, Sid, Token, TokenKind,
};

pub use acl::{
    AclManager, AuthorizationRequest, AuthorizationResponse, AuthorizationService,
    ResourceAclPolicy, ResourceAclService,
};

pub use infra::{AclStore, AuthzError, Result, ShadowStore, TokenStore};
