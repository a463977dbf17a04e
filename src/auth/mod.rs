//! Service-to-service authentication.
//!
//! Callers of this service are other platform services (API gateway,
//! inventory, bus bridge), not end users; end users are identified by the
//! explicit `user_id` carried in each request body. Each caller presents a
//! service key formatted as `hg_<service_prefix><random>`; only the SHA-256
//! hash is stored. Keys carry coarse capabilities: `check` (authorization
//! queries), `sync` (shadow mutation), `manage` (token and principal
//! administration).

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Service key prefix.
pub const SERVICE_KEY_PREFIX: &str = "hg_";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authentication")]
    MissingAuth,
    #[error("invalid service key")]
    InvalidKey,
    #[error("service key lacks the {0} capability")]
    MissingCapability(&'static str),
}

/// Authenticated caller identity, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// Logical name of the calling service.
    pub service: String,
    pub can_check: bool,
    pub can_sync: bool,
    pub can_manage: bool,
}

impl ServiceContext {
    /// Context granted when authentication is disabled (dev mode) or for the
    /// bootstrap key.
    pub fn unrestricted(service: &str) -> Self {
        Self {
            service: service.to_string(),
            can_check: true,
            can_sync: true,
            can_manage: true,
        }
    }

    pub fn require_check(&self) -> Result<(), AuthError> {
        if self.can_check {
            Ok(())
        } else {
            Err(AuthError::MissingCapability("check"))
        }
    }

    pub fn require_sync(&self) -> Result<(), AuthError> {
        if self.can_sync {
            Ok(())
        } else {
            Err(AuthError::MissingCapability("sync"))
        }
    }

    pub fn require_manage(&self) -> Result<(), AuthError> {
        if self.can_manage {
            Ok(())
        } else {
            Err(AuthError::MissingCapability("manage"))
        }
    }
}

/// Service key metadata as persisted.
#[derive(Debug, Clone)]
pub struct ServiceKeyRecord {
    /// Hash of the key (never store plaintext).
    pub key_hash: String,
    pub service: String,
    pub can_check: bool,
    pub can_sync: bool,
    pub can_manage: bool,
    pub active: bool,
}

/// Validates service keys against an in-memory snapshot loaded at startup.
pub struct ServiceKeyValidator {
    keys: RwLock<HashMap<String, ServiceKeyRecord>>,
}

impl ServiceKeyValidator {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a new service key.
    ///
    /// Returns (plaintext_key, key_hash).
    pub fn generate_key(service: &str) -> (String, String) {
        use rand::Rng;
        let random_bytes: [u8; 24] = rand::thread_rng().gen();
        let random_part = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes,
        );

        let service_prefix: String = service.chars().take(8).collect();
        let plaintext_key = format!("{SERVICE_KEY_PREFIX}{service_prefix}{random_part}");
        let key_hash = Self::hash_key(&plaintext_key);
        (plaintext_key, key_hash)
    }

    /// Hash a service key for storage.
    pub fn hash_key(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn register_key(&self, record: ServiceKeyRecord) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        keys.insert(record.key_hash.clone(), record);
    }

    /// Validate a plaintext key and return the caller's context.
    pub fn validate(&self, key: &str) -> Result<ServiceContext, AuthError> {
        if !key.starts_with(SERVICE_KEY_PREFIX) {
            return Err(AuthError::InvalidKey);
        }

        let key_hash = Self::hash_key(key);
        let keys = self.keys.read().unwrap_or_else(|e| e.into_inner());
        let record = keys.get(&key_hash).ok_or(AuthError::InvalidKey)?;
        if !record.active {
            return Err(AuthError::InvalidKey);
        }

        Ok(ServiceContext {
            service: record.service.clone(),
            can_check: record.can_check,
            can_sync: record.can_sync,
            can_manage: record.can_manage,
        })
    }

    pub fn revoke(&self, key_hash: &str) {
        let mut keys = self.keys.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = keys.get_mut(key_hash) {
            record.active = false;
        }
    }
}

impl Default for ServiceKeyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Authenticator over the Authorization header.
pub struct Authenticator {
    validator: Arc<ServiceKeyValidator>,
}

impl Authenticator {
    pub fn new(validator: Arc<ServiceKeyValidator>) -> Self {
        Self { validator }
    }

    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<ServiceContext, AuthError> {
        let header = auth_header.ok_or(AuthError::MissingAuth)?;

        if let Some(key) = header.strip_prefix("ApiKey ") {
            return self.validator.validate(key);
        }
        if let Some(key) = header.strip_prefix("Bearer ") {
            return self.validator.validate(key);
        }
        // Raw key, no scheme.
        if header.starts_with(SERVICE_KEY_PREFIX) {
            return self.validator.validate(header);
        }

        Err(AuthError::MissingAuth)
    }
}

/// Service context extension for request handlers.
#[derive(Clone)]
pub struct ServiceContextExt(pub ServiceContext);

/// Authentication middleware state.
#[derive(Clone)]
pub struct AuthMiddlewareState {
    pub authenticator: Arc<Authenticator>,
    /// If false, requests run with an unrestricted context (dev mode).
    pub require_auth: bool,
}

/// Authentication middleware.
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let context = match state.authenticator.authenticate(auth_header) {
        Ok(context) => context,
        Err(e) if state.require_auth => return auth_error_response(e),
        Err(_) => ServiceContext::unrestricted("dev"),
    };

    request.extensions_mut().insert(ServiceContextExt(context));
    next.run(request).await
}

/// Convert an auth error to an HTTP response.
pub fn auth_error_response(error: AuthError) -> Response {
    let (status, message) = match &error {
        AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Missing authentication".to_string()),
        AuthError::InvalidKey => (StatusCode::UNAUTHORIZED, "Invalid service key".to_string()),
        AuthError::MissingCapability(cap) => (
            StatusCode::FORBIDDEN,
            format!("Service key lacks the {cap} capability"),
        ),
    };

    (
        status,
        axum::Json(serde_json::json!({
            "error": message,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: String, active: bool) -> ServiceKeyRecord {
        ServiceKeyRecord {
            key_hash: hash,
            service: "gateway".to_string(),
            can_check: true,
            can_sync: false,
            can_manage: false,
            active,
        }
    }

    #[test]
    fn generate_key_format() {
        let (key, hash) = ServiceKeyValidator::generate_key("gateway");
        assert!(key.starts_with(SERVICE_KEY_PREFIX));
        assert_eq!(hash.len(), 64); // SHA-256 hex
    }

    #[test]
    fn validate_key() {
        let validator = ServiceKeyValidator::new();
        let (key, hash) = ServiceKeyValidator::generate_key("gateway");
        validator.register_key(record(hash, true));

        let context = validator.validate(&key).unwrap();
        assert_eq!(context.service, "gateway");
        assert!(context.require_check().is_ok());
        assert!(context.require_sync().is_err());
        assert!(context.require_manage().is_err());
    }

    #[test]
    fn invalid_key() {
        let validator = ServiceKeyValidator::new();
        assert!(validator.validate("invalid_key").is_err());
        assert!(validator.validate("hg_unregistered").is_err());
    }

    #[test]
    fn revoked_key() {
        let validator = ServiceKeyValidator::new();
        let (key, hash) = ServiceKeyValidator::generate_key("gateway");
        validator.register_key(record(hash.clone(), true));

        assert!(validator.validate(&key).is_ok());
        validator.revoke(&hash);
        assert!(validator.validate(&key).is_err());
    }

    #[test]
    fn authenticator_schemes() {
        let validator = Arc::new(ServiceKeyValidator::new());
        let (key, hash) = ServiceKeyValidator::generate_key("inventory");
        validator.register_key(ServiceKeyRecord {
            key_hash: hash,
            service: "inventory".to_string(),
            can_check: false,
            can_sync: true,
            can_manage: false,
            active: true,
        });
        let authenticator = Authenticator::new(validator);

        assert!(authenticator.authenticate(None).is_err());
        assert!(authenticator
            .authenticate(Some(&format!("ApiKey {key}")))
            .is_ok());
        assert!(authenticator
            .authenticate(Some(&format!("Bearer {key}")))
            .is_ok());
        assert!(authenticator.authenticate(Some(&key)).is_ok());
    }
}
