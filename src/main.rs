//! Postgate binary entry point

use postgate::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load configuration from file and environment
/// 2. Initialize tracing/logging from the `logging` section
/// 3. Initialize metrics
/// 4. Initialize AppState (database, identity provider discovery)
/// 5. Build Axum router
/// 6. Start background tasks (session sweep)
/// 7. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration
    let config = config::AppConfig::load()?;

    // 2. Initialize tracing/logging; RUST_LOG overrides the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.filter_directive().into());

    if config.logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Postgate...");
    tracing::info!(
        domain = %config.server.domain,
        protocol = %config.server.protocol,
        issuer = %config.oidc.issuer_url(),
        level = %config.logging.level,
        "Configuration loaded"
    );

    // 3. Initialize metrics
    postgate::metrics::init_metrics();

    // 4. Initialize application state; nothing is served until the
    //    identity provider is ready
    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(error) => {
            tracing::error!(%error, "Startup failed; server will not start");
            return Err(error.into());
        }
    };

    // 5. Build Axum router
    let app = postgate::build_router(state.clone());

    // 6. Start background tasks
    spawn_session_sweep_task(state.clone());

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn background task purging expired sessions
fn spawn_session_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let configured_interval_secs = state.config.auth.session_sweep_interval_seconds;
        let interval_secs = configured_interval_secs.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        if configured_interval_secs == 0 {
            tracing::warn!(
                "auth.session_sweep_interval_seconds=0 is invalid; clamped to 1 second"
            );
        }

        loop {
            interval.tick().await;

            let purged = state.sessions.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Expired sessions purged");
            }
        }
    });

    tracing::info!("Session sweep task spawned");
}
