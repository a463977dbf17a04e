//! API token entity.
//!
//! A token is both a credential resolving to its owner's SID and its own
//! [`ObjectIdentity`](super::ObjectIdentity) carrying an ACL used for scope
//! restriction. Only the SHA-256 hash of the secret is persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token flavor. Login tokens are minted by the auth service at login and
/// are unrestricted by default; default tokens are long-lived API tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Login,
    Default,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Login => "login",
            TokenKind::Default => "default",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "login" => Some(TokenKind::Login),
            "default" => Some(TokenKind::Default),
            _ => None,
        }
    }
}

/// Persisted token record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub id: Uuid,
    pub owner: Uuid,
    pub kind: TokenKind,
    /// Hex-encoded SHA-256 of the plaintext secret.
    pub secret_hash: String,
    /// Expiry as epoch seconds; `None` = never expires.
    pub expires_at: Option<i64>,
    pub enabled: bool,
}

impl Token {
    /// A token is valid iff it is enabled and not expired. Secret
    /// verification happens at lookup (by hash).
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.expires_at.map_or(true, |exp| now.timestamp() < exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(enabled: bool, expires_at: Option<i64>) -> Token {
        Token {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            kind: TokenKind::Default,
            secret_hash: "deadbeef".into(),
            expires_at,
            enabled,
        }
    }

    #[test]
    fn validity() {
        let now = Utc::now();
        assert!(token(true, None).is_valid_at(now));
        assert!(token(true, Some(now.timestamp() + 60)).is_valid_at(now));
        assert!(!token(true, Some(now.timestamp() - 1)).is_valid_at(now));
        assert!(!token(false, None).is_valid_at(now));
    }
}
