//! Protected resources: kinds, object identities, ACL records and shadows.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{Permission, Sid};

/// Closed set of protected resource kinds.
///
/// ACLs are keyed by (kind, id); the kind also selects the default-permission
/// policy applied at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Device,
    App,
    Token,
    Tree,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Device => "device",
            ResourceKind::App => "app",
            ResourceKind::Token => "token",
            ResourceKind::Tree => "tree",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "device" => Some(ResourceKind::Device),
            "app" => Some(ResourceKind::App),
            "token" => Some(ResourceKind::Token),
            "tree" => Some(ResourceKind::Tree),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle of one protected resource. Unique per (kind, id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub kind: ResourceKind,
    pub id: Uuid,
}

impl ObjectIdentity {
    pub fn new(kind: ResourceKind, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn device(id: Uuid) -> Self {
        Self::new(ResourceKind::Device, id)
    }

    pub fn app(id: Uuid) -> Self {
        Self::new(ResourceKind::App, id)
    }

    pub fn token(id: Uuid) -> Self {
        Self::new(ResourceKind::Token, id)
    }

    pub fn tree(id: Uuid) -> Self {
        Self::new(ResourceKind::Tree, id)
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// One grant (or deny) record. At most one ACE exists per
/// (object identity, sid, permission); the store enforces this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlEntry {
    pub sid: Sid,
    pub permission: Permission,
    pub granting: bool,
}

impl AccessControlEntry {
    pub fn grant(sid: Sid, permission: Permission) -> Self {
        Self {
            sid,
            permission,
            granting: true,
        }
    }
}

/// The grant list for one object identity, created lazily on the first grant.
///
/// `parent` plus `inheriting` drive hierarchical checks: a permission missing
/// here may still be granted by an ancestor's ACL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclRecord {
    pub object: ObjectIdentity,
    pub parent: Option<ObjectIdentity>,
    pub inheriting: bool,
    /// Entries in insertion order.
    pub entries: Vec<AccessControlEntry>,
}

impl AclRecord {
    pub fn new(object: ObjectIdentity) -> Self {
        Self {
            object,
            parent: None,
            inheriting: false,
            entries: Vec::new(),
        }
    }

    /// Find a resolvable entry for (sid, permission).
    pub fn entry_for(&self, sid: &Sid, permission: Permission) -> Option<&AccessControlEntry> {
        self.entries
            .iter()
            .find(|e| e.sid == *sid && e.permission == permission)
    }

    /// Granting permissions held by `sid`, in entry order.
    pub fn granted_to(&self, sid: &Sid) -> Vec<Permission> {
        self.entries
            .iter()
            .filter(|e| e.sid == *sid && e.granting)
            .map(|e| e.permission)
            .collect()
    }
}

/// Minimal local mirror of a resource owned by the inventory service.
///
/// Never created independently; rows only appear through the sync protocol.
/// `revision` is the owning service's mutation timestamp (epoch seconds) and
/// rejects out-of-order sync traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowResource {
    pub kind: ResourceKind,
    pub uuid: Uuid,
    pub owner: Uuid,
    pub parent: Option<Uuid>,
    pub revision: i64,
    pub deleted: bool,
}

impl ShadowResource {
    /// Object identity of this shadow.
    pub fn object_identity(&self) -> ObjectIdentity {
        ObjectIdentity::new(self.kind, self.uuid)
    }

    /// Object identity of the parent resource, if any. Parents share the
    /// child's kind: device under device, tree node under tree node.
    pub fn parent_identity(&self) -> Option<ObjectIdentity> {
        self.parent.map(|p| ObjectIdentity::new(self.kind, p))
    }
}
