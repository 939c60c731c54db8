//! Prometheus Metrics Registry - Oracle Observability
//!
//! Registers the oracle's Prometheus metrics for Grafana dashboards.
//! Covers published index prices, consensus outcomes, per-exchange
//! sample flow, reconnects and REST read failures.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::ports::ConsensusMetrics;

/// Centralized Prometheus metrics for the oracle.
///
/// All metrics follow the naming convention `oracle_*`. The registry is
/// not the global default one, so tests can create as many as they like.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Last published index price per market.
    pub index_price: GaugeVec,
    /// Ticks that produced an accepted composite price.
    pub ticks_accepted: IntCounterVec,
    /// Ticks rejected by the consensus algorithm, by reason.
    pub ticks_rejected: IntCounterVec,
    /// Acceptances that only happened because the rejected run was too long.
    pub forced_acceptances: IntCounterVec,
    /// Sink calls that returned an error.
    pub sink_failures: IntCounterVec,
    /// Samples written to a price store, per exchange.
    pub samples_stored: IntCounterVec,
    /// Reconnects started, per exchange and reason.
    pub reconnects: IntCounterVec,
    /// REST reads abandoned after exhausting retries or failing to parse.
    pub rest_read_failures: IntCounterVec,
    /// Streaming session status (1 = connected, 0 = not).
    pub feed_connected: GaugeVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let index_price = GaugeVec::new(
            Opts::new("oracle_index_price", "Last published index price"),
            &["market_id"],
        )?;

        let ticks_accepted = IntCounterVec::new(
            Opts::new("oracle_ticks_accepted_total", "Ticks with an accepted price"),
            &["market_id"],
        )?;

        let ticks_rejected = IntCounterVec::new(
            Opts::new(
                "oracle_ticks_rejected_total",
                "Ticks rejected by consensus",
            ),
            &["market_id", "reason"],
        )?;

        let forced_acceptances = IntCounterVec::new(
            Opts::new(
                "oracle_forced_acceptances_total",
                "Prices accepted after too many consecutive rejections",
            ),
            &["market_id"],
        )?;

        let sink_failures = IntCounterVec::new(
            Opts::new("oracle_sink_failures_total", "Failed price sink calls"),
            &["market_id"],
        )?;

        let samples_stored = IntCounterVec::new(
            Opts::new(
                "oracle_samples_stored_total",
                "Price samples stored per exchange",
            ),
            &["exchange"],
        )?;

        let reconnects = IntCounterVec::new(
            Opts::new("oracle_reconnects_total", "Streaming reconnects started"),
            &["exchange", "reason"],
        )?;

        let rest_read_failures = IntCounterVec::new(
            Opts::new(
                "oracle_rest_read_failures_total",
                "Abandoned REST price reads",
            ),
            &["exchange"],
        )?;

        let feed_connected = GaugeVec::new(
            Opts::new(
                "oracle_feed_connected",
                "Feed connection status (1=connected, 0=disconnected)",
            ),
            &["exchange"],
        )?;

        // Register all metrics
        registry.register(Box::new(index_price.clone()))?;
        registry.register(Box::new(ticks_accepted.clone()))?;
        registry.register(Box::new(ticks_rejected.clone()))?;
        registry.register(Box::new(forced_acceptances.clone()))?;
        registry.register(Box::new(sink_failures.clone()))?;
        registry.register(Box::new(samples_stored.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(rest_read_failures.clone()))?;
        registry.register(Box::new(feed_connected.clone()))?;

        Ok(Self {
            registry,
            index_price,
            ticks_accepted,
            ticks_rejected,
            forced_acceptances,
            sink_failures,
            samples_stored,
            reconnects,
            rest_read_failures,
            feed_connected,
        })
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Router serving `/metrics`.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&self);
                async move {
                    match metrics.gather_text() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        )
    }
}

impl ConsensusMetrics for MetricsRegistry {
    fn tick_accepted(&self, market_id: &str, forced: bool) {
        self.ticks_accepted.with_label_values(&[market_id]).inc();
        if forced {
            self.forced_acceptances.with_label_values(&[market_id]).inc();
        }
    }

    fn tick_rejected(&self, market_id: &str, reason: &str) {
        self.ticks_rejected
            .with_label_values(&[market_id, reason])
            .inc();
    }

    fn sink_failed(&self, market_id: &str) {
        self.sink_failures.with_label_values(&[market_id]).inc();
    }
}
