//! Structured API error responses with error codes
//!
//! Consistent error handling across all API endpoints with machine-readable
//! error codes and human-readable messages.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Codes
// ============================================================================

/// Error codes for API responses
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors (1xxx)
    /// No authentication credentials provided
    AuthRequired,
    /// Invalid service key format or value
    InvalidServiceKey,
    /// Invalid or revoked access token
    InvalidToken,
    /// Access token has expired
    TokenExpired,
    /// The acting user may not perform this operation
    AccessDenied,

    // Validation errors (3xxx)
    /// Request body is malformed
    InvalidRequestBody,
    /// Required field is missing
    MissingRequiredField,
    /// Field value is invalid
    InvalidFieldValue,

    // Resource errors (4xxx)
    /// Unknown permission label
    PermissionNotFound,
    /// Unknown resource kind
    ResourceKindNotFound,
    /// Mirrored user not found
    UserNotFound,
    /// Shadow resource not found
    ResourceNotFound,
    /// Referenced parent resource not found
    ParentNotFound,
    /// ACL not found for the object identity
    AclNotFound,

    // Conflict errors (5xxx)
    /// Incoming sync payload is older than the stored shadow
    StaleRevision,
    /// Concurrent ACL writers exhausted the retry budget
    AclConflict,

    // Infrastructure errors (8xxx)
    /// Database operation failed
    DatabaseError,
    /// Internal server error
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn numeric_code(&self) -> u32 {
        match self {
            // Auth (1xxx)
            ErrorCode::AuthRequired => 1001,
            ErrorCode::InvalidServiceKey => 1002,
            ErrorCode::InvalidToken => 1003,
            ErrorCode::TokenExpired => 1004,
            ErrorCode::AccessDenied => 1005,

            // Validation (3xxx)
            ErrorCode::InvalidRequestBody => 3001,
            ErrorCode::MissingRequiredField => 3002,
            ErrorCode::InvalidFieldValue => 3003,

            // Resource (4xxx)
            ErrorCode::PermissionNotFound => 4001,
            ErrorCode::ResourceKindNotFound => 4002,
            ErrorCode::UserNotFound => 4003,
            ErrorCode::ResourceNotFound => 4004,
            ErrorCode::ParentNotFound => 4005,
            ErrorCode::AclNotFound => 4006,

            // Conflict (5xxx)
            ErrorCode::StaleRevision => 5001,
            ErrorCode::AclConflict => 5002,

            // Infrastructure (8xxx)
            ErrorCode::DatabaseError => 8001,
            ErrorCode::InternalError => 8999,
        }
    }

    /// Get the HTTP status code for this error
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Auth errors -> 401/403
            ErrorCode::AuthRequired => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidServiceKey => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::TokenExpired => StatusCode::UNAUTHORIZED,
            ErrorCode::AccessDenied => StatusCode::FORBIDDEN,

            // Validation -> 400
            ErrorCode::InvalidRequestBody => StatusCode::BAD_REQUEST,
            ErrorCode::MissingRequiredField => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidFieldValue => StatusCode::BAD_REQUEST,

            // Resource -> 404
            ErrorCode::PermissionNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ResourceKindNotFound => StatusCode::NOT_FOUND,
            ErrorCode::UserNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
            ErrorCode::ParentNotFound => StatusCode::NOT_FOUND,
            ErrorCode::AclNotFound => StatusCode::NOT_FOUND,

            // Conflict -> 409
            ErrorCode::StaleRevision => StatusCode::CONFLICT,
            ErrorCode::AclConflict => StatusCode::CONFLICT,

            // Infrastructure -> 500
            ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code_str = match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::InvalidServiceKey => "INVALID_SERVICE_KEY",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::MissingRequiredField => "MISSING_REQUIRED_FIELD",
            ErrorCode::InvalidFieldValue => "INVALID_FIELD_VALUE",
            ErrorCode::PermissionNotFound => "PERMISSION_NOT_FOUND",
            ErrorCode::ResourceKindNotFound => "RESOURCE_KIND_NOT_FOUND",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::ResourceNotFound => "RESOURCE_NOT_FOUND",
            ErrorCode::ParentNotFound => "PARENT_NOT_FOUND",
            ErrorCode::AclNotFound => "ACL_NOT_FOUND",
            ErrorCode::StaleRevision => "STALE_REVISION",
            ErrorCode::AclConflict => "ACL_CONFLICT",
            ErrorCode::DatabaseError => "DATABASE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", code_str)
    }
}

// ============================================================================
// Structured Error Response
// ============================================================================

/// Structured error response for API endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error details
    pub error: ErrorDetails,
}

/// Detailed error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code for easy categorization
    pub numeric_code: u32,

    /// Human-readable error message
    pub message: String,

    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Related resource ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetails {
                code,
                numeric_code: code.numeric_code(),
                message: message.into(),
                details: None,
                resource_id: None,
            },
        }
    }

    /// Set additional details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    /// Set related resource ID
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.error.resource_id = Some(id.into());
        self
    }

    /// Get the HTTP status code
    pub fn status(&self) -> StatusCode {
        self.error.code.http_status()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code_str = self.error.code.to_string();
        let mut response = (status, Json(self)).into_response();

        // Add error code header for easier debugging
        if let Ok(code_value) = axum::http::HeaderValue::from_str(&code_str) {
            response.headers_mut().insert(
                axum::http::header::HeaderName::from_static("x-error-code"),
                code_value,
            );
        }

        response
    }
}

// ============================================================================
// Conversion from AuthzError
// ============================================================================

impl From<crate::infra::AuthzError> for ApiError {
    fn from(err: crate::infra::AuthzError) -> Self {
        use crate::infra::AuthzError;

        match err {
            AuthzError::Database(e) => {
                ApiError::new(ErrorCode::DatabaseError, format!("Database error: {}", e))
            }
            AuthzError::AclNotFound(object) => {
                ApiError::new(ErrorCode::AclNotFound, format!("ACL not found: {}", object))
                    .with_resource_id(object.to_string())
            }
            AuthzError::SidNotLoaded(sid) => ApiError::new(
                ErrorCode::UserNotFound,
                format!("Principal not mirrored yet: {}", sid),
            )
            .with_resource_id(sid.to_string()),
            AuthzError::AclRace(msg) => ApiError::new(
                ErrorCode::AclConflict,
                format!("Concurrent ACL update, retries exhausted: {}", msg),
            ),
            AuthzError::ShadowNotFound { kind, id } => ApiError::new(
                ErrorCode::ResourceNotFound,
                format!("Resource not found: {}/{}", kind, id),
            )
            .with_resource_id(id.to_string()),
            AuthzError::UserNotFound(id) => {
                ApiError::new(ErrorCode::UserNotFound, format!("User not found: {}", id))
                    .with_resource_id(id.to_string())
            }
            AuthzError::ParentNotFound(id) => ApiError::new(
                ErrorCode::ParentNotFound,
                format!("Parent resource not found: {}", id),
            )
            .with_resource_id(id.to_string()),
            AuthzError::StaleSync {
                kind,
                id,
                incoming,
                stored,
            } => ApiError::new(
                ErrorCode::StaleRevision,
                format!(
                    "Stale sync for {}/{}: incoming revision {} < stored {}",
                    kind, id, incoming, stored
                ),
            )
            .with_details(serde_json::json!({
                "kind": kind,
                "id": id,
                "incoming_revision": incoming,
                "stored_revision": stored
            })),
            AuthzError::AccessDenied(msg) => ApiError::new(ErrorCode::AccessDenied, msg),
            AuthzError::UnknownPermission(label) => ApiError::new(
                ErrorCode::PermissionNotFound,
                format!("Unknown permission: {}", label),
            ),
            AuthzError::UnknownResourceKind(kind) => ApiError::new(
                ErrorCode::ResourceKindNotFound,
                format!("Unknown resource kind: {}", kind),
            ),
            AuthzError::TokenInvalid => {
                ApiError::new(ErrorCode::InvalidToken, "Invalid or revoked token")
            }
            AuthzError::TokenExpired(id) => {
                ApiError::new(ErrorCode::TokenExpired, format!("Token expired: {}", id))
                    .with_resource_id(id.to_string())
            }
            AuthzError::Validation(msg) => ApiError::new(ErrorCode::InvalidFieldValue, msg),
            AuthzError::Configuration(msg) => ApiError::new(
                ErrorCode::InternalError,
                format!("Configuration error: {}", msg),
            ),
            AuthzError::Internal(msg) => ApiError::new(ErrorCode::InternalError, msg),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Create a not found error for a specific resource type
pub fn not_found(resource_type: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError::new(
        ErrorCode::ResourceNotFound,
        format!("{} not found: {}", resource_type, id),
    )
    .with_resource_id(id.to_string())
}

/// Create a validation error with field details
pub fn validation_error(field: &str, message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::InvalidFieldValue, message.into()).with_details(serde_json::json!({
        "field": field
    }))
}

/// Create a forbidden error
pub fn forbidden(message: impl Into<String>) -> ApiError {
    ApiError::new(ErrorCode::AccessDenied, message.into())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::AuthzError;
    use uuid::Uuid;

    #[test]
    fn test_error_code_numeric() {
        assert_eq!(ErrorCode::AuthRequired.numeric_code(), 1001);
        assert_eq!(ErrorCode::InvalidRequestBody.numeric_code(), 3001);
        assert_eq!(ErrorCode::UserNotFound.numeric_code(), 4003);
        assert_eq!(ErrorCode::StaleRevision.numeric_code(), 5001);
        assert_eq!(ErrorCode::DatabaseError.numeric_code(), 8001);
        assert_eq!(ErrorCode::InternalError.numeric_code(), 8999);
    }

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(
            ErrorCode::AuthRequired.http_status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ErrorCode::AccessDenied.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ErrorCode::InvalidRequestBody.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorCode::PermissionNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ErrorCode::StaleRevision.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_api_error_builder() {
        let error = ApiError::new(ErrorCode::ResourceNotFound, "Device not found")
            .with_resource_id("device-456")
            .with_details(serde_json::json!({"extra": "info"}));

        assert_eq!(error.error.code, ErrorCode::ResourceNotFound);
        assert_eq!(error.error.resource_id, Some("device-456".to_string()));
        assert!(error.error.details.is_some());
    }

    #[test]
    fn test_stale_sync_conversion() {
        let id = Uuid::new_v4();
        let error: ApiError = AuthzError::StaleSync {
            kind: "device".to_string(),
            id,
            incoming: 5,
            stored: 9,
        }
        .into();

        assert_eq!(error.error.code, ErrorCode::StaleRevision);
        assert_eq!(error.status(), StatusCode::CONFLICT);
        assert!(error.error.details.is_some());
    }

    #[test]
    fn test_unknown_permission_conversion() {
        let error: ApiError = AuthzError::UnknownPermission("fly".to_string()).into();
        assert_eq!(error.error.code, ErrorCode::PermissionNotFound);
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_serialization() {
        let error = ApiError::new(ErrorCode::UserNotFound, "User not found");
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("USER_NOT_FOUND"));
        assert!(json.contains("User not found"));
        assert!(json.contains("4003")); // numeric_code
    }

    #[test]
    fn test_error_display() {
        assert_eq!(ErrorCode::UserNotFound.to_string(), "USER_NOT_FOUND");
        assert_eq!(ErrorCode::StaleRevision.to_string(), "STALE_REVISION");
    }
}
