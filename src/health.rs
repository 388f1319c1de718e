//! Liveness and readiness endpoints
//!
//! `/healthz` answers as soon as the process serves HTTP. `/readyz` answers
//! only once the controllers are running, which for a standby replica means
//! never until it wins the leader election.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::Error;

/// Shared readiness flag
#[derive(Clone, Debug, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    /// Mark the operator ready (controllers started)
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Whether controllers are running
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Create the health router
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controllers not running")
    }
}

/// Serve the health endpoints until the process exits
pub async fn serve(addr: SocketAddr, state: HealthState) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal(format!("failed to bind health endpoint {addr}: {e}")))?;
    info!(%addr, "Health endpoints listening");
    axum::serve(listener, health_router(state))
        .await
        .map_err(|e| Error::internal(format!("health endpoint failed: {e}")))
}
