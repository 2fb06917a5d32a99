//! Server initialization and routing
//!
//! This module handles the Axum server setup including:
//! - Router configuration
//! - Middleware stack (access log, body limit, timeout, tracing)
//! - Credential provisioning and metrics recorder at startup
//! - Graceful shutdown handling

use crate::config::ServerConfig;
use crate::error::handle_layer_error;
use crate::logging::init_tracing;
use crate::middleware::access_log;
use crate::routes::{health, not_found, purge};
use crate::state::ServerState;
use akapurge::provision_edgerc;
use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes and middleware
///
/// Middleware stack (applied in reverse order):
/// 1. Request tracing
/// 2. Timeout handling, rendered as a JSON 408
/// 3. Body size limit for extractors
/// 4. Access log
///
/// Handlers and the access log read bodies with their own limit so that an
/// oversized request gets the JSON 413 in both paths.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let max_body_size = state.config.app.server.max_body_size();
    let timeout = state.config.app.server.timeout();

    Router::new()
        .route("/api/v1/purge", post(purge::purge))
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), access_log))
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_layer_error))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the purge gateway
///
/// Sets up JSON logging, writes the credentials file if none exists yet,
/// installs the Prometheus recorder and serves until SIGTERM or Ctrl+C.
pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    init_tracing(&config.log_level, config.disable_trace);

    let akamai = &config.app.akamai;
    if provision_edgerc(&akamai.credentials_path, &akamai.credentials())? {
        tracing::info!(path = %akamai.credentials_path.display(), "wrote credentials file");
    }

    let recorder = PrometheusBuilder::new().install_recorder()?;
    let state = Arc::new(ServerState::new(config.clone())?.with_metrics(recorder));

    let addr: SocketAddr = config.app.server.socket_addr()?;

    tracing::info!(
        addr = %addr,
        upstream = %state.purger.base_url(),
        access_logs = config.app.logs.show_access_logs,
        post_purge = config.app.post_purge_request.enabled,
        "starting purge gateway"
    );
    tracing::info!(
        "Timeout: {}s, Max body: {}MB",
        config.app.server.timeout_secs,
        config.app.server.max_body_size_mb
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
