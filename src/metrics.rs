//! Reconcile metrics in the Prometheus text format
//!
//! Every controller reports the outcome of each reconcile pass; `/metrics`
//! renders the counters for scraping.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use tracing::info;

use crate::Error;

const RECONCILE_TOTAL: &str = "openfga_operator_reconcile_total";

/// Outcome of a reconcile pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Outcome {
    /// The reconciler returned an action
    Success,
    /// The reconciler (or the watch feeding it) returned an error
    Error,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

/// Reconcile counters shared by all controllers
#[derive(Clone, Debug, Default)]
pub struct ReconcileMetrics {
    counts: Arc<DashMap<(&'static str, Outcome), u64>>,
}

impl ReconcileMetrics {
    /// Count one reconcile pass of `controller`
    pub fn record(&self, controller: &'static str, outcome: Outcome) {
        *self.counts.entry((controller, outcome)).or_insert(0) += 1;
    }

    /// Passes recorded so far for `controller` with `outcome`
    pub fn count(&self, controller: &'static str, outcome: Outcome) -> u64 {
        self.counts
            .get(&(controller, outcome))
            .map(|c| *c)
            .unwrap_or_default()
    }

    /// Render all counters, sorted by controller and outcome
    pub fn render(&self) -> String {
        let sorted: BTreeMap<_, _> = self
            .counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        let mut out = String::new();
        let _ = writeln!(
            out,
            "# HELP {RECONCILE_TOTAL} Reconcile passes by controller and outcome"
        );
        let _ = writeln!(out, "# TYPE {RECONCILE_TOTAL} counter");
        for ((controller, outcome), count) in sorted {
            let _ = writeln!(
                out,
                "{RECONCILE_TOTAL}{{controller=\"{controller}\",result=\"{}\"}} {count}",
                outcome.as_str()
            );
        }
        out
    }
}

/// Create the metrics router
pub fn metrics_router(metrics: ReconcileMetrics) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(metrics)
}

async fn render(State(metrics): State<ReconcileMetrics>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Serve `/metrics` until the process exits
pub async fn serve(addr: SocketAddr, metrics: ReconcileMetrics) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::internal(format!("failed to bind metrics endpoint {addr}: {e}")))?;
    info!(%addr, "Metrics listening");
    axum::serve(listener, metrics_router(metrics))
        .await
        .map_err(|e| Error::internal(format!("metrics endpoint failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn counters_accumulate_per_controller_and_outcome() {
        let metrics = ReconcileMetrics::default();
        metrics.record("Store", Outcome::Success);
        metrics.record("Store", Outcome::Success);
        metrics.record("Model", Outcome::Error);

        assert_eq!(metrics.count("Store", Outcome::Success), 2);
        assert_eq!(metrics.count("Store", Outcome::Error), 0);
        assert_eq!(metrics.count("Model", Outcome::Error), 1);
    }

    #[tokio::test]
    async fn metrics_endpoint_renders_prometheus_text() {
        let metrics = ReconcileMetrics::default();
        metrics.record("Store", Outcome::Success);
        metrics.record("Model", Outcome::Error);

        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = metrics_router(metrics).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(
            text,
            "# HELP openfga_operator_reconcile_total Reconcile passes by controller and outcome\n\
             # TYPE openfga_operator_reconcile_total counter\n\
             openfga_operator_reconcile_total{controller=\"Model\",result=\"error\"} 1\n\
             openfga_operator_reconcile_total{controller=\"Store\",result=\"success\"} 1\n"
        );
    }
}
