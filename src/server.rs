//! HTTP server bootstrap.
//!
//! This module wires together:
//! - configuration
//! - database connection pool
//! - core services (ACL manager, per-kind resource services, sync, tokens)
//! - the Axum router

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::cors::AllowOrigin;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use crate::acl::{AclManager, AuthorizationService, ResourceAclPolicy, ResourceAclService};
use crate::auth::{
    AuthMiddlewareState, Authenticator, ServiceKeyRecord, ServiceKeyValidator,
};
use crate::infra::postgres::load_service_keys;
use crate::infra::{PgAclStore, PgShadowStore, PgTokenStore, ShadowStore, TokenStore};
use crate::sync::{EventConsumer, SyncService};
use crate::token::TokenService;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Server listen address.
    pub listen_addr: SocketAddr,
    /// Maximum database connections.
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/hivegrid_authz".to_string());

        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let listen_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid listen address {host}:{port}: {e}"))?;

        let max_connections: u32 = std::env::var("MAX_DB_CONNECTIONS")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10);

        Ok(Self {
            database_url,
            listen_addr,
            max_connections,
        })
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub facade: Arc<AuthorizationService>,
    pub sync: Arc<SyncService>,
    pub consumer: Arc<EventConsumer>,
    pub tokens: Arc<TokenService>,
    pub shadows: Arc<dyn ShadowStore>,
    pub pool: PgPool,
}

impl AppState {
    /// Wire the service graph on top of the given pool.
    pub fn build(pool: PgPool) -> Self {
        let acl_store = Arc::new(PgAclStore::new(pool.clone()));
        let shadows: Arc<dyn ShadowStore> = Arc::new(PgShadowStore::new(pool.clone()));
        let token_store: Arc<dyn TokenStore> = Arc::new(PgTokenStore::new(pool.clone()));

        let manager = Arc::new(AclManager::new(acl_store));
        let devices = Arc::new(ResourceAclService::new(
            ResourceAclPolicy::device(),
            manager.clone(),
        ));
        let apps = Arc::new(ResourceAclService::new(
            ResourceAclPolicy::app(),
            manager.clone(),
        ));
        let token_acl = Arc::new(ResourceAclService::new(
            ResourceAclPolicy::token(),
            manager.clone(),
        ));
        let trees = Arc::new(ResourceAclService::new(ResourceAclPolicy::tree(), manager));

        let facade = Arc::new(AuthorizationService::new(
            devices,
            apps,
            token_acl.clone(),
            trees,
            shadows.clone(),
        ));
        let sync = Arc::new(SyncService::new(shadows.clone(), facade.clone()));
        let consumer = Arc::new(EventConsumer::new(sync.clone(), shadows.clone()));
        let tokens = Arc::new(TokenService::new(token_store, token_acl));

        Self {
            facade,
            sync,
            consumer,
            tokens,
            shadows,
            pool,
        }
    }
}

/// Start the HTTP server.
pub async fn run() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting HiveGrid Authz v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Max connections: {}", config.max_connections);

    // Connect to PostgreSQL
    info!("Connecting to PostgreSQL...");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;
    info!("Connected to PostgreSQL");

    let migrate_on_startup = std::env::var("DB_MIGRATE_ON_STARTUP")
        .ok()
        .map(|v| {
            !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "off"
            )
        })
        .unwrap_or(true);
    if migrate_on_startup {
        info!("Running database migrations...");
        crate::migrations::run_postgres(&pool).await?;
        info!("Database migrations applied");
    } else {
        info!("DB migrations skipped (DB_MIGRATE_ON_STARTUP=0)");
    }

    // Auth configuration
    let auth_mode = std::env::var("AUTH_MODE").unwrap_or_else(|_| "required".to_string());
    let require_auth = auth_mode != "disabled";

    let validator = Arc::new(ServiceKeyValidator::new());
    let mut any_auth_configured = false;

    if let Ok(bootstrap_key) = std::env::var("BOOTSTRAP_ADMIN_API_KEY") {
        let key_hash = ServiceKeyValidator::hash_key(&bootstrap_key);
        validator.register_key(ServiceKeyRecord {
            key_hash,
            service: "bootstrap".to_string(),
            can_check: true,
            can_sync: true,
            can_manage: true,
            active: true,
        });
        any_auth_configured = true;
        info!("Bootstrap admin service key is configured");
    }

    let stored_keys = load_service_keys(&pool).await?;
    if !stored_keys.is_empty() {
        info!("Loaded {} service keys from database", stored_keys.len());
        any_auth_configured = true;
    }
    for row in stored_keys {
        validator.register_key(ServiceKeyRecord {
            key_hash: row.key_hash,
            service: row.service,
            can_check: row.can_check,
            can_sync: row.can_sync,
            can_manage: row.can_manage,
            active: row.active,
        });
    }

    if require_auth && !any_auth_configured {
        anyhow::bail!(
            "AUTH_MODE=required but no service keys are configured; set BOOTSTRAP_ADMIN_API_KEY or seed the service_key table (or set AUTH_MODE=disabled for local dev)"
        );
    }

    let auth_state = AuthMiddlewareState {
        authenticator: Arc::new(Authenticator::new(validator)),
        require_auth,
    };

    // Create application state
    let state = AppState::build(pool);

    // Build router
    let app = build_router(auth_state)?.with_state(state);

    // Start server
    info!("Starting HTTP server on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    info!("HiveGrid Authz is ready to accept connections");
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

fn build_router(auth_state: AuthMiddlewareState) -> anyhow::Result<Router<AppState>> {
    let api = crate::api::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        crate::auth::auth_middleware,
    ));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http());

    if let Some(cors_layer) = cors_layer_from_env()? {
        router = router.layer(cors_layer);
    }

    Ok(router)
}

fn cors_layer_from_env() -> anyhow::Result<Option<CorsLayer>> {
    let origins = match std::env::var("CORS_ALLOW_ORIGINS") {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };

    let origins = origins.trim();
    if origins.is_empty() {
        return Ok(None);
    }

    let allow_origin = if origins == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<HeaderValue>()
                    .map_err(|e| anyhow::anyhow!("Invalid CORS origin {s:?}: {e}"))
            })
            .collect::<anyhow::Result<_>>()?;
        AllowOrigin::list(origins)
    };

    Ok(Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ]),
    ))
}

/// Health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "service": "hivegrid-authz",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness check endpoint.
async fn readiness_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<axum::Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => Ok(axum::Json(serde_json::json!({
            "status": "ready",
            "database": "connected",
        }))),
        Err(e) => Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            format!("Database unavailable: {}", e),
        )),
    }
}
