//! Metrics and health HTTP endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use image_syncer_core::error::{Result, SyncError};
use image_syncer_engine::PrometheusMetrics;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Parse a listen address; a bare `:port` binds all interfaces.
pub fn listen_addr(addr: &str) -> Result<SocketAddr> {
    let addr = addr.trim();
    let full = match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => addr.to_string(),
    };
    full.parse()
        .map_err(|e| SyncError::ConfigError(format!("Invalid listen address '{}': {}", addr, e)))
}

/// `GET /metrics` in the Prometheus text format.
pub fn metrics_router(metrics: Arc<PrometheusMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// `GET /healthz` and `GET /readyz`.
pub fn health_router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}

async fn metrics_handler(State(metrics): State<Arc<PrometheusMetrics>>) -> Response {
    match metrics.export() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, metrics.content_type())],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz() -> &'static str {
    "OK"
}

async fn readyz() -> &'static str {
    "Ready"
}

/// Serve `router` on `addr` until `cancel` fires.
pub async fn serve(
    name: &'static str,
    addr: SocketAddr,
    router: Router,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(server = name, addr = %addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::debug!(server = name, "Server stopped");
    Ok(())
}
