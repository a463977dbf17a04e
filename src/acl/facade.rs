//! Authorization façade consumed by the API layer.
//!
//! Combines user-level resource checks with the token-scoped permission
//! overlay, and hosts the list/set wrappers behind the permission-management
//! endpoints. Checks fail closed: unexpected errors deny and log.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Permission, Principal, ResourceKind};
use crate::infra::{AuthzError, Result, ShadowStore};

use super::ResourceAclService;

/// Authorization check as received from the API gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Permission label; unknown labels are rejected, never ignored.
    pub permission: String,
    /// Resource kind label.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<Uuid>,
    /// Subject of the check. When absent the acting user is the subject;
    /// checking another user requires super-admin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Token the request was authenticated with, for the scope overlay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,
}

/// Authorization decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

impl AuthorizationResponse {
    fn deny() -> Self {
        Self {
            result: false,
            roles: None,
        }
    }

    fn decided(result: bool, subject: &Principal) -> Self {
        let role = if subject.super_admin { "admin" } else { "user" };
        Self {
            result,
            roles: Some(vec![role.to_string()]),
        }
    }
}

/// Single entry point for permission checks and permission management.
pub struct AuthorizationService {
    devices: Arc<ResourceAclService>,
    apps: Arc<ResourceAclService>,
    tokens: Arc<ResourceAclService>,
    trees: Arc<ResourceAclService>,
    shadows: Arc<dyn ShadowStore>,
}

impl AuthorizationService {
    pub fn new(
        devices: Arc<ResourceAclService>,
        apps: Arc<ResourceAclService>,
        tokens: Arc<ResourceAclService>,
        trees: Arc<ResourceAclService>,
        shadows: Arc<dyn ShadowStore>,
    ) -> Self {
        Self {
            devices,
            apps,
            tokens,
            trees,
            shadows,
        }
    }

    pub fn service_for(&self, kind: ResourceKind) -> &ResourceAclService {
        match kind {
            ResourceKind::Device => &self.devices,
            ResourceKind::App => &self.apps,
            ResourceKind::Token => &self.tokens,
            ResourceKind::Tree => &self.trees,
        }
    }

    /// Resolve a mirrored principal; `None` when the user is unknown.
    pub async fn resolve_principal(&self, user_id: &Uuid) -> Result<Option<Principal>> {
        self.shadows.principal(user_id).await
    }

    /// Decide whether the acting user (or the requested subject) holds
    /// `permission` on the named resource.
    ///
    /// - unknown permission label or resource kind ⇒ error (the API maps it
    ///   to a not-found/bad-request response, never a silent deny-or-allow)
    /// - CREATE with no object id ⇒ allowed for any enabled user: the object
    ///   does not exist yet and `register()` performs the real grant after
    ///   creation
    /// - LIST never resolves a concrete resource: any enabled user passes;
    ///   result scoping lives in the caller's search layer
    /// - a token with explicit scope entries restricts the result to the
    ///   intersection of the user grant and the token grant
    pub async fn check_permission(
        &self,
        acting: &Principal,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse> {
        let permission = Permission::from_label(&request.permission)
            .ok_or_else(|| AuthzError::UnknownPermission(request.permission.clone()))?;
        let kind = ResourceKind::from_str(&request.kind)
            .ok_or_else(|| AuthzError::UnknownResourceKind(request.kind.clone()))?;

        let subject = match request.user_id {
            Some(target) if target != acting.user_id => {
                if !acting.super_admin {
                    debug!(acting = %acting.user_id, target = %target,
                        "non-admin asked about another user, denying");
                    return Ok(AuthorizationResponse::deny());
                }
                match self.shadows.principal(&target).await? {
                    Some(p) => p,
                    None => {
                        debug!(target = %target, "unknown subject user, denying");
                        return Ok(AuthorizationResponse::deny());
                    }
                }
            }
            _ => *acting,
        };

        // Creation checks run before the object exists; the subsequent
        // mutation re-checks through register().
        if permission == Permission::Create && request.object_id.is_none() {
            return Ok(AuthorizationResponse::decided(subject.enabled, &subject));
        }

        let service = self.service_for(kind);
        let mut allowed = service
            .check(request.object_id, Some(&subject), Some(permission))
            .await;

        if allowed {
            if let Some(token_id) = request.token_id {
                allowed = self
                    .token_overlay(token_id, &subject, permission)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(token = %token_id, error = %e, "token overlay failed, denying");
                        false
                    });
            }
        }

        Ok(AuthorizationResponse::decided(allowed, &subject))
    }

    /// Token-scoped overlay: a token with zero explicit ACEs leaves the
    /// user's authority untouched; one or more entries make the token's own
    /// ACL the second gate.
    async fn token_overlay(
        &self,
        token_id: Uuid,
        subject: &Principal,
        permission: Permission,
    ) -> Result<bool> {
        let scopes = self.tokens.list(token_id, &subject.sid()).await?;
        if scopes.is_empty() {
            return Ok(true);
        }
        Ok(self
            .tokens
            .check(Some(token_id), Some(subject), Some(permission))
            .await)
    }

    /// Granting permission labels held by `user_id` on the resource.
    pub async fn permission_labels(
        &self,
        kind: ResourceKind,
        object_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<String>> {
        let perms = self
            .service_for(kind)
            .list(object_id, &crate::domain::Sid(user_id))
            .await?;
        Ok(Permission::labels(&perms)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Replace `user_id`'s grants on the resource with the given labels.
    /// Any unknown label rejects the whole request before mutation.
    pub async fn set_permission_labels(
        &self,
        kind: ResourceKind,
        object_id: Uuid,
        user_id: Uuid,
        labels: &[String],
    ) -> Result<()> {
        let mut permissions = Vec::with_capacity(labels.len());
        for label in labels {
            let permission = Permission::from_label(label)
                .ok_or_else(|| AuthzError::UnknownPermission(label.clone()))?;
            permissions.push(permission);
        }
        self.service_for(kind)
            .set(object_id, &crate::domain::Sid(user_id), &permissions)
            .await
    }
}
