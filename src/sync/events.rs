//! Event-driven sync path.
//!
//! The inventory service publishes lifecycle events on the shared bus. The
//! consumer decodes them, resolves the event's subject user into an explicit
//! acting [`Principal`] (no ambient security context), and replays the event
//! through the same [`SyncService`] the direct path uses. Only `object`
//! events drive sync here; data/action/user traffic belongs to other
//! services. Stale events are logged and dropped, never retried.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::ResourceKind;
use crate::infra::{AuthzError, Result, ShadowStore};

use super::{SyncOperation, SyncRequest, SyncService};

/// Top-level message category on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Object,
    Data,
    Action,
    User,
}

/// Resource payload of an object lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventObject {
    pub id: Uuid,
    pub kind: ResourceKind,
    /// Mutation timestamp, epoch seconds.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

/// Lifecycle event envelope as published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "type")]
    pub category: EventCategory,
    pub op: SyncOperation,
    pub object: EventObject,
    /// Subject user the event executes as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

/// Consumes bus messages and feeds object events into the sync service.
/// Transport-agnostic: whatever owns the bus connection hands raw payloads
/// to [`EventConsumer::handle_message`].
pub struct EventConsumer {
    sync: Arc<SyncService>,
    shadows: Arc<dyn ShadowStore>,
}

impl EventConsumer {
    pub fn new(sync: Arc<SyncService>, shadows: Arc<dyn ShadowStore>) -> Self {
        Self { sync, shadows }
    }

    /// Decode and apply one bus message.
    pub async fn handle_message(&self, payload: &[u8]) -> Result<()> {
        let event: LifecycleEvent = serde_json::from_slice(payload)
            .map_err(|e| AuthzError::Validation(format!("undecodable bus message: {e}")))?;
        self.handle_event(&event).await
    }

    /// Apply one decoded lifecycle event.
    pub async fn handle_event(&self, event: &LifecycleEvent) -> Result<()> {
        if event.category != EventCategory::Object {
            debug!(category = ?event.category, "ignoring non-object event");
            return Ok(());
        }

        let subject = event.user_id.ok_or_else(|| {
            AuthzError::Validation("object event is missing its subject user".into())
        })?;
        let acting = self
            .shadows
            .principal(&subject)
            .await?
            .ok_or(AuthzError::UserNotFound(subject))?;

        let request = SyncRequest {
            operation: event.op,
            kind: event.object.kind,
            object_id: event.object.id,
            user_id: Some(subject),
            parent_id: event.object.parent_id,
            created_at: event.object.created_at,
        };

        match self.sync.apply(&acting, &request).await {
            Ok(_) => Ok(()),
            // Out-of-order delivery; the newer state already won.
            Err(AuthzError::StaleSync {
                kind,
                id,
                incoming,
                stored,
            }) => {
                warn!(kind, id = %id, incoming, stored, "dropping stale lifecycle event");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
