mod config;
mod resume;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, post},
};
use relay_core::Relay;
use relay_store::SqliteSettings;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::routes::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/tasks/active", get(routes::active_tasks))
        .route("/tasks/completed", get(routes::completed_tasks))
        .route("/state/{action}", post(routes::set_global_state))
        .route("/tasks/{group}/{item}/{action}", post(routes::control_task))
        .route("/tasks/{group}/{item}", delete(routes::remove_task))
        .route("/history", delete(routes::clear_history))
        .route("/probe", post(routes::probe))
        .route("/relay", post(routes::start_relay))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_server=debug,relay_core=info,relay_webdav=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if !config.webdav.is_configured() {
        warn!("RELAY_WEBDAV_URL is empty; every transfer will fail until it is set");
    }

    let store = Arc::new(SqliteSettings::open(&config.db_path)?);
    let relay = Arc::new(Relay::open(store, config.webdav.clone())?);

    // Crash recovery: prune pending records already complete in history.
    let pending = relay.recover();
    if !pending.is_empty() {
        if config.resume_pending {
            tokio::spawn(resume::resume_pending(Arc::clone(&relay), pending));
        } else {
            info!(count = pending.len(), "Pending transfers left for manual retry");
        }
    }

    let app = router(AppState { relay });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Media relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
