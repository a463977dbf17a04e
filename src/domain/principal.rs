//! Principals and caller context.
//!
//! A [`Sid`] is the opaque principal identifier stored in ACEs, bound to a
//! user's UUID. A [`Principal`] is the resolved caller context threaded
//! explicitly through every authorization call; there is no ambient
//! "current user" state.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque principal identifier bound to a user's UUID. Unique per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sid(pub Uuid);

impl Sid {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for Sid {
    fn from(id: Uuid) -> Self {
        Sid(id)
    }
}

/// Resolved caller context for one authorization or sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub enabled: bool,
    pub super_admin: bool,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            enabled: true,
            super_admin: false,
        }
    }

    pub fn super_admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            enabled: true,
            super_admin: true,
        }
    }

    pub fn sid(&self) -> Sid {
        Sid(self.user_id)
    }
}
