//! `/metrics` exposition endpoint.

use crate::error::ProbeError;
use crate::metrics::ProbeMetrics;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use prometheus::TEXT_FORMAT;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Router serving `GET /metrics` from `metrics`.
pub fn router(metrics: Arc<ProbeMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(metrics)
}

async fn render(State(metrics): State<Arc<ProbeMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve metrics on `addr` until the process exits.
pub async fn serve(metrics: Arc<ProbeMetrics>, addr: SocketAddr) -> Result<(), ProbeError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server starting on {}/metrics", listener.local_addr()?);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
