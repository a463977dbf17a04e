//! REST API handlers.
//!
//! Every route is service-key-authenticated by the auth middleware; the
//! end-user identity is always carried explicitly in the request body or
//! path, never inferred from ambient state.

use axum::extract::{Extension, Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use uuid::Uuid;

use crate::acl::AuthorizationRequest;
use crate::auth::{AuthError, ServiceContextExt};
use crate::domain::{Principal, ResourceKind, TokenKind};
use crate::sync::{LifecycleEvent, SyncOperation, SyncRequest};
use crate::server::AppState;

use super::error::{not_found, validation_error, ApiError, ErrorCode};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/authorize", post(authorize))
        .route("/v1/sync", post(sync))
        .route("/v1/events", post(ingest_event))
        .route(
            "/v1/resources/:kind/:object_id/permissions/:user_id",
            get(get_resource_permissions).put(put_resource_permissions),
        )
        .route(
            "/v1/tokens/:token_id/permissions/:user_id",
            get(get_token_permissions).put(put_token_permissions),
        )
        .route("/v1/tokens", post(create_token))
        .route("/v1/tokens/:token_id", axum::routing::delete(delete_token))
        .route("/v1/principals", post(upsert_principal))
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth => {
                ApiError::new(ErrorCode::AuthRequired, "Missing authentication")
            }
            AuthError::InvalidKey => {
                ApiError::new(ErrorCode::InvalidServiceKey, "Invalid service key")
            }
            AuthError::MissingCapability(_) => {
                ApiError::new(ErrorCode::AccessDenied, err.to_string())
            }
        }
    }
}

// ============================================================================
// Authorization
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthorizeBody {
    /// Gateway-authenticated caller.
    acting_user_id: Uuid,
    permission: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object_id: Option<Uuid>,
    /// Optional different subject; super-admin only.
    #[serde(default)]
    user_id: Option<Uuid>,
    #[serde(default)]
    token_id: Option<Uuid>,
}

async fn authorize(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Json(body): Json<AuthorizeBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_check()?;

    // An unknown acting user is a plain deny, not an error: the gateway may
    // race ahead of the user-directory sync.
    let Some(acting) = state.facade.resolve_principal(&body.acting_user_id).await? else {
        return Ok(Json(serde_json::json!({ "result": false })));
    };

    let request = AuthorizationRequest {
        permission: body.permission,
        kind: body.kind,
        object_id: body.object_id,
        user_id: body.user_id,
        token_id: body.token_id,
    };
    let response = state.facade.check_permission(&acting, &request).await?;
    Ok(Json(serde_json::json!(response)))
}

// ============================================================================
// Shadow sync
// ============================================================================

async fn sync(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_sync()?;

    let acting_id = match request.user_id {
        Some(id) => id,
        None => match state.shadows.get(request.kind, &request.object_id).await? {
            Some(existing) => existing.owner,
            None if request.operation == SyncOperation::Delete => {
                // Delete of a shadow we never had; nothing to authorize.
                return Ok(Json(serde_json::json!({ "deleted": false })));
            }
            None => return Err(validation_error("user_id", "user_id is required on create")),
        },
    };
    let acting = state
        .facade
        .resolve_principal(&acting_id)
        .await?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::UserNotFound,
                format!("User not found: {acting_id}"),
            )
            .with_resource_id(acting_id.to_string())
        })?;

    match state.sync.apply(&acting, &request).await? {
        Some(shadow) => Ok(Json(serde_json::json!({
            "kind": shadow.kind.as_str(),
            "object_id": shadow.uuid,
            "owner": shadow.owner,
            "parent": shadow.parent,
            "revision": shadow.revision,
        }))),
        None => Ok(Json(serde_json::json!({ "deleted": true }))),
    }
}

/// Bus-message ingestion fallback for deployments without a direct consumer.
async fn ingest_event(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Json(event): Json<LifecycleEvent>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_sync()?;
    state.consumer.handle_event(&event).await?;
    Ok(Json(serde_json::json!({ "accepted": true })))
}

// ============================================================================
// Permission management
// ============================================================================

fn parse_kind(raw: &str) -> Result<ResourceKind, ApiError> {
    ResourceKind::from_str(raw).ok_or_else(|| {
        ApiError::new(
            ErrorCode::ResourceKindNotFound,
            format!("Unknown resource kind: {raw}"),
        )
    })
}

async fn get_resource_permissions(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Path((kind, object_id, user_id)): Path<(String, Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_manage()?;
    let kind = parse_kind(&kind)?;
    let permissions = state
        .facade
        .permission_labels(kind, object_id, user_id)
        .await?;
    Ok(Json(serde_json::json!({ "permissions": permissions })))
}

#[derive(Debug, Deserialize)]
struct PutPermissionsBody {
    permissions: Vec<String>,
}

async fn put_resource_permissions(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Path((kind, object_id, user_id)): Path<(String, Uuid, Uuid)>,
    Json(body): Json<PutPermissionsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_manage()?;
    let kind = parse_kind(&kind)?;
    state
        .facade
        .set_permission_labels(kind, object_id, user_id, &body.permissions)
        .await?;
    Ok(Json(serde_json::json!({ "permissions": body.permissions })))
}

async fn get_token_permissions(
    state: State<AppState>,
    ctx: Extension<ServiceContextExt>,
    Path((token_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    get_resource_permissions(
        state,
        ctx,
        Path(("token".to_string(), token_id, user_id)),
    )
    .await
}

async fn put_token_permissions(
    state: State<AppState>,
    ctx: Extension<ServiceContextExt>,
    Path((token_id, user_id)): Path<(Uuid, Uuid)>,
    body: Json<PutPermissionsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    put_resource_permissions(
        state,
        ctx,
        Path(("token".to_string(), token_id, user_id)),
        body,
    )
    .await
}

// ============================================================================
// Token lifecycle
// ============================================================================

#[derive(Debug, Deserialize)]
struct CreateTokenBody {
    owner_id: Uuid,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    ttl_seconds: Option<i64>,
}

async fn create_token(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Json(body): Json<CreateTokenBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_manage()?;

    let owner = state
        .facade
        .resolve_principal(&body.owner_id)
        .await?
        .ok_or_else(|| not_found("User", body.owner_id))?;

    let kind = match body.kind.as_deref() {
        None => TokenKind::Default,
        Some(raw) => TokenKind::from_str(raw)
            .ok_or_else(|| validation_error("kind", format!("Unknown token kind: {raw}")))?,
    };

    let created = state.tokens.create(&owner, kind, body.ttl_seconds).await?;
    Ok(Json(serde_json::json!({
        "id": created.token.id,
        "owner_id": created.token.owner,
        "kind": created.token.kind.as_str(),
        "secret": created.secret,
        "expires_at": created.token.expires_at,
    })))
}

async fn delete_token(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_manage()?;
    if !state.tokens.delete(&token_id).await? {
        return Err(not_found("Token", token_id));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ============================================================================
// Principal mirror
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpsertPrincipalBody {
    user_id: Uuid,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    super_admin: bool,
}

fn default_enabled() -> bool {
    true
}

async fn upsert_principal(
    State(state): State<AppState>,
    Extension(ServiceContextExt(ctx)): Extension<ServiceContextExt>,
    Json(body): Json<UpsertPrincipalBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.require_manage()?;
    let principal = Principal {
        user_id: body.user_id,
        enabled: body.enabled,
        super_admin: body.super_admin,
    };
    state.shadows.upsert_principal(&principal).await?;
    Ok(Json(serde_json::json!({
        "user_id": principal.user_id,
        "enabled": principal.enabled,
        "super_admin": principal.super_admin,
    })))
}
