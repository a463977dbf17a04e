//! Permission vocabulary.
//!
//! The set is closed and the bit values are persisted; they must never shift
//! across versions. An unknown label maps to `None` and the caller is
//! responsible for turning that into a 404 rather than proceeding.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One permission bit with a stable label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Create,
    Delete,
    List,
    Push,
    Pull,
    Subscribe,
    Execute,
    Administration,
}

/// All permissions in bit order.
pub const ALL_PERMISSIONS: [Permission; 10] = [
    Permission::Read,
    Permission::Write,
    Permission::Create,
    Permission::Delete,
    Permission::List,
    Permission::Push,
    Permission::Pull,
    Permission::Subscribe,
    Permission::Execute,
    Permission::Administration,
];

impl Permission {
    /// Stable bitmask value as persisted in `ace.permission_bit`.
    pub fn mask(&self) -> u32 {
        match self {
            Permission::Read => 1,
            Permission::Write => 2,
            Permission::Create => 4,
            Permission::Delete => 8,
            Permission::List => 16,
            Permission::Push => 32,
            Permission::Pull => 64,
            Permission::Subscribe => 128,
            Permission::Execute => 256,
            Permission::Administration => 512,
        }
    }

    /// Reverse of [`Permission::mask`]. Unknown bit ⇒ `None`.
    pub fn from_mask(mask: u32) -> Option<Self> {
        ALL_PERMISSIONS.iter().copied().find(|p| p.mask() == mask)
    }

    /// Stable lowercase label used on the wire and in ACL management APIs.
    pub fn label(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Create => "create",
            Permission::Delete => "delete",
            Permission::List => "list",
            Permission::Push => "push",
            Permission::Pull => "pull",
            Permission::Subscribe => "subscribe",
            Permission::Execute => "execute",
            Permission::Administration => "administration",
        }
    }

    /// Resolve a label. Unknown label ⇒ `None`; callers must map this to a
    /// not-found response, never treat it as "no permission required".
    pub fn from_label(label: &str) -> Option<Self> {
        ALL_PERMISSIONS
            .iter()
            .copied()
            .find(|p| p.label().eq_ignore_ascii_case(label))
    }

    /// Map a permission list to labels.
    pub fn labels(perms: &[Permission]) -> Vec<&'static str> {
        perms.iter().map(|p| p.label()).collect()
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
