//! Status and metrics HTTP endpoint
//!
//! A small read-only surface over the controller's shared state:
//! - `GET /healthz` - process liveness
//! - `GET /status` - current reconcile state and renewal counters (JSON)
//! - `GET /metrics` - the renewal counters in Prometheus text format

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::controller::{ReconcileState, StatusHandle};
use crate::Result;

/// Body of the `/status` response
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Most recently discovered reconcile state
    pub state: ReconcileState,
    /// Whether Done has been reached this process lifetime
    pub done: bool,
    /// Successful operational-token renewals
    pub renewals_succeeded: u64,
    /// Failed operational-token renewals
    pub renewals_failed: u64,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn status(State(handle): State<StatusHandle>) -> Json<StatusResponse> {
    Json(StatusResponse {
        state: handle.state().await,
        done: handle.done_reached(),
        renewals_succeeded: handle.metrics().renewals_succeeded(),
        renewals_failed: handle.metrics().renewals_failed(),
    })
}

async fn metrics(State(handle): State<StatusHandle>) -> String {
    handle.metrics().render()
}

/// Create the status router
pub fn router(handle: StatusHandle) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/metrics", get(metrics))
        .with_state(handle)
}

/// Bind and serve the status endpoint until the process exits
pub async fn serve(handle: StatusHandle, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "status endpoint listening");
    axum::serve(listener, router(handle)).await?;
    Ok(())
}
