//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7, together with the
//! Prometheus /metrics route, on a single listener. Readiness is set once
//! the pricing pipeline is wired and cleared again on shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::prometheus::MetricsRegistry;

/// Shared health state polled by readiness probes.
#[derive(Debug, Default)]
pub struct HealthState {
    /// Whether the pricing pipeline is running.
    ready: AtomicBool,
}

impl HealthState {
    /// Create a new health state (not ready until the pipeline starts).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Check if the oracle is publishing prices.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

/// Axum-based health and metrics HTTP server.
pub struct HealthServer {
    /// Health state shared with main.
    state: Arc<HealthState>,
    /// Metrics served under /metrics.
    metrics: Arc<MetricsRegistry>,
    /// Bind address (default 0.0.0.0:9090 from config).
    bind_address: String,
}

impl HealthServer {
    /// Create a new health server.
    pub fn new(
        state: Arc<HealthState>,
        metrics: Arc<MetricsRegistry>,
        bind_address: impl Into<String>,
    ) -> Self {
        Self {
            state,
            metrics,
            bind_address: bind_address.into(),
        }
    }

    /// Router with all probe and metrics routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.state))
            .merge(Arc::clone(&self.metrics).router())
    }

    /// Serve until the cancellation token fires.
    #[instrument(skip(self, cancel), fields(address = %self.bind_address))]
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;

        info!("Health and metrics server started");

        let state = Arc::clone(&self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
                state.set_ready(false);
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    /// Readiness probe: returns 200 only while the pipeline is running.
    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}
