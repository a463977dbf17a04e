//! HTTP API surface.

pub mod error;
pub mod rest;

pub use error::{ApiError, ErrorCode};
pub use rest::router;
