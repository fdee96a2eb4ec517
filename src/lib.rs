//! Postgate - A minimal blog backend with federated sign-in
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      HTTP Layer (Axum)                       │
//! │  - Pages: /, /home, /admin                                  │
//! │  - Sign-in: /login, /authorization-code/callback, /logout   │
//! │  - Posts resource: /posts, /posts/:id                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Identity Gate                           │
//! │  - OpenID Connect client                                    │
//! │  - Server-side session store                                │
//! │  - require_login / require_session guards                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx), schema synced from migrations             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for pages, posts and metrics
//! - `auth`: OpenID Connect sign-in and sessions
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus instruments

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod metrics;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// This struct is cloned for each request and contains
/// shared resources like the database pool and session store.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// Server-side sessions keyed by session id
    pub sessions: Arc<auth::SessionStore>,

    /// Identity provider used for sign-in
    pub identity: Arc<dyn auth::IdentityProvider>,
}

impl AppState {
    /// Initialize application state
    ///
    /// # Steps
    /// 1. Discover the identity provider
    /// 2. Connect to SQLite database (runs schema sync)
    ///
    /// # Errors
    /// Returns error if any initialization step fails
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let identity = auth::OidcProvider::discover(&config.oidc)
            .await
            .inspect_err(|error| {
                tracing::error!(%error, "Unable to configure identity provider");
            })?;
        Self::with_identity_provider(config, Arc::new(identity)).await
    }

    /// Initialize application state around an already-built identity provider
    pub async fn with_identity_provider(
        config: config::AppConfig,
        identity: Arc<dyn auth::IdentityProvider>,
    ) -> Result<Self, error::AppError> {
        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!("Database connected");

        let sessions = auth::SessionStore::new(config.auth.session_max_age);

        tracing::info!("Application state initialized successfully");

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            sessions: Arc::new(sessions),
            identity,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::{
        compression::CompressionLayer, limit::RequestBodyLimitLayer, services::ServeDir,
        trace::TraceLayer,
    };

    let cors_layer = build_cors_layer(&state.config.server);
    let static_dir = state.config.web.static_dir.clone();
    let body_limit = state.config.web.body_limit_bytes;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(auth::auth_router())
        .merge(api::pages_router(state.clone()))
        .merge(api::posts_router(state.clone()))
        .merge(api::metrics_router(state.clone()))
        .fallback_service(ServeDir::new(static_dir))
        .layer(middleware::from_fn(metrics::track_http_metrics))
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

fn build_cors_layer(server: &config::ServerConfig) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{Any, CorsLayer};

    if !server.protocol.eq_ignore_ascii_case("https") {
        return CorsLayer::permissive();
    }

    let allowed_origin = server.base_url();
    match HeaderValue::from_str(&allowed_origin) {
        Ok(origin) => CorsLayer::new()
            .allow_origin([origin])
            .allow_methods(Any)
            .allow_headers(Any),
        Err(error) => {
            tracing::error!(
                %error,
                origin = %allowed_origin,
                "Failed to parse CORS origin from server base URL; denying cross-origin requests"
            );
            CorsLayer::new().allow_methods(Any).allow_headers(Any)
        }
    }
}

async fn health_check() -> &'static str {
    "OK"
}
