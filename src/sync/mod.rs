//! Shadow-consistency protocol.
//!
//! Resources (devices, apps, tree nodes) are owned by the inventory service.
//! Two triggers keep the local shadow rows current: the owning service calls
//! [`SyncService::apply`] synchronously right after mutating the canonical
//! resource, and it also publishes lifecycle events on the shared bus which
//! the [`events::EventConsumer`] replays through the same path. Both paths
//! are idempotent; the revision guard rejects out-of-order payloads so a
//! stale update cannot resurrect a deleted shadow row.

pub mod events;

pub use events::{EventCategory, EventConsumer, EventObject, LifecycleEvent};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::acl::AuthorizationService;
use crate::domain::{Permission, Principal, ResourceKind, ShadowResource};
use crate::infra::{AuthzError, Result, ShadowStore};

/// Mutation kind reported by the owning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
}

/// Direct sync call from the owning service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub operation: SyncOperation,
    /// device | app | tree. Tokens are local and never synced.
    pub kind: ResourceKind,
    pub object_id: Uuid,
    /// Owner of the resource. Optional on update (keeps the stored owner)
    /// and on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// The owning service's mutation timestamp, epoch seconds. Used as the
    /// monotonic revision for the staleness guard.
    pub created_at: i64,
}

/// Applies sync requests: upserts or tombstones shadow rows and drives the
/// idempotent default-permission bootstrap.
pub struct SyncService {
    shadows: Arc<dyn ShadowStore>,
    authz: Arc<AuthorizationService>,
}

impl SyncService {
    pub fn new(shadows: Arc<dyn ShadowStore>, authz: Arc<AuthorizationService>) -> Self {
        Self { shadows, authz }
    }

    /// Apply one sync request on behalf of `acting`.
    ///
    /// Authorization: a caller acting for someone else's resource must be a
    /// super-admin or hold ADMINISTRATION on the resource.
    pub async fn apply(
        &self,
        acting: &Principal,
        request: &SyncRequest,
    ) -> Result<Option<ShadowResource>> {
        if request.kind == ResourceKind::Token {
            return Err(AuthzError::Validation(
                "token resources are not synced".into(),
            ));
        }

        match request.operation {
            SyncOperation::Create | SyncOperation::Update => {
                self.apply_upsert(acting, request).await.map(Some)
            }
            SyncOperation::Delete => {
                self.apply_delete(acting, request).await?;
                Ok(None)
            }
        }
    }

    async fn apply_upsert(
        &self,
        acting: &Principal,
        request: &SyncRequest,
    ) -> Result<ShadowResource> {
        let existing = self.shadows.get(request.kind, &request.object_id).await?;

        let owner = request
            .user_id
            .or(existing.as_ref().map(|s| s.owner))
            .ok_or_else(|| AuthzError::Validation("user_id is required on create".into()))?;

        // When the row already exists, the stored owner is the one whose
        // resource is being touched; reassigning ownership needs rights on
        // that resource, not on the incoming owner.
        let current_owner = existing.as_ref().map(|s| s.owner).unwrap_or(owner);
        self.authorize(acting, current_owner, request).await?;

        // The owner must already be mirrored; sync never invents principals.
        if self.shadows.principal(&owner).await?.is_none() {
            return Err(AuthzError::UserNotFound(owner));
        }
        if let Some(parent) = request.parent_id {
            if self.shadows.get(request.kind, &parent).await?.is_none() {
                return Err(AuthzError::ParentNotFound(parent));
            }
        }

        let shadow = ShadowResource {
            kind: request.kind,
            uuid: request.object_id,
            owner,
            parent: request.parent_id,
            revision: request.created_at,
            deleted: false,
        };
        let stored = self.shadows.upsert(&shadow).await?;

        // Idempotent bootstrap; re-running never duplicates grants.
        self.authz
            .service_for(request.kind)
            .register(&stored, acting)
            .await?;

        info!(kind = %request.kind, object = %request.object_id, owner = %owner,
            op = ?request.operation, "shadow resource synced");
        Ok(stored)
    }

    async fn apply_delete(&self, acting: &Principal, request: &SyncRequest) -> Result<()> {
        if let Some(existing) = self.shadows.get(request.kind, &request.object_id).await? {
            self.authorize(acting, existing.owner, request).await?;
        }

        let removed = self
            .shadows
            .mark_deleted(request.kind, &request.object_id, request.created_at)
            .await?;

        if removed {
            // Cascade: the resource's grants go with it.
            self.authz
                .service_for(request.kind)
                .unregister(request.object_id)
                .await?;
            info!(kind = %request.kind, object = %request.object_id,
                "shadow resource deleted, acl cascaded");
        }
        Ok(())
    }

    async fn authorize(
        &self,
        acting: &Principal,
        owner: Uuid,
        request: &SyncRequest,
    ) -> Result<()> {
        if acting.user_id == owner || acting.super_admin {
            return Ok(());
        }
        let allowed = self
            .authz
            .service_for(request.kind)
            .is_granted(
                request.object_id,
                &acting.sid(),
                Permission::Administration,
            )
            .await;
        if allowed {
            Ok(())
        } else {
            Err(AuthzError::AccessDenied(format!(
                "user {} may not sync {}/{} owned by {}",
                acting.user_id, request.kind, request.object_id, owner
            )))
        }
    }
}
