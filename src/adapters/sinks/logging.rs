//! Logging Price Sink - Standalone Downstream
//!
//! Accepts every index price and keeps per-market delivery statistics.
//! Once per summary period the statistics of all markets are logged
//! and reset, which makes feed gaps visible without a real consumer.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::price::MarketId;
use crate::ports::PriceSink;

/// Default period between two summaries.
pub const SUMMARY_PERIOD: Duration = Duration::from_secs(15 * 60);

/// Delivery statistics of one market since the last summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketStats {
    pub count: u64,
    pub batch_start: DateTime<Utc>,
    pub last_received: DateTime<Utc>,
    pub last_price: f64,
    pub longest_interval: Duration,
}

#[derive(Debug)]
struct Trackers {
    markets: HashMap<MarketId, MarketStats>,
    last_summary: DateTime<Utc>,
}

/// Sink that only logs.
#[derive(Debug)]
pub struct LoggingPriceSink {
    period: Duration,
    trackers: Mutex<Trackers>,
}

impl LoggingPriceSink {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            trackers: Mutex::new(Trackers {
                markets: HashMap::new(),
                last_summary: Utc::now(),
            }),
        }
    }

    /// Record one price received at `now`.
    ///
    /// Returns the statistics logged if this update closed a summary period.
    pub async fn record(
        &self,
        market_id: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Option<Vec<(MarketId, MarketStats)>> {
        let mut trackers = self.trackers.lock().await;
        let last_summary = trackers.last_summary;

        let stats = trackers
            .markets
            .entry(market_id.to_string())
            .or_insert_with(|| MarketStats {
                count: 0,
                batch_start: last_summary,
                last_received: last_summary,
                last_price: price,
                longest_interval: Duration::ZERO,
            });
        let interval = (now - stats.last_received).to_std().unwrap_or(Duration::ZERO);
        stats.longest_interval = stats.longest_interval.max(interval);
        stats.count += 1;
        stats.last_received = now;
        stats.last_price = price;

        let since_summary = (now - last_summary).to_std().unwrap_or(Duration::ZERO);
        if since_summary <= self.period {
            return None;
        }

        let mut summary: Vec<(MarketId, MarketStats)> = trackers
            .markets
            .iter()
            .map(|(id, stats)| (id.clone(), stats.clone()))
            .collect();
        summary.sort_by(|a, b| a.0.cmp(&b.0));

        for (market_id, stats) in &summary {
            let batch = (now - stats.batch_start).to_std().unwrap_or(Duration::ZERO);
            warn!(
                market_id = %market_id,
                count = stats.count,
                batch_secs = batch.as_secs(),
                last_price = stats.last_price,
                longest_interval_secs = stats.longest_interval.as_secs(),
                "Index price summary"
            );
        }
        for stats in trackers.markets.values_mut() {
            stats.count = 0;
            stats.batch_start = now;
            stats.longest_interval = Duration::ZERO;
        }
        trackers.last_summary = now;
        Some(summary)
    }

    /// Current statistics of one market.
    pub async fn stats(&self, market_id: &str) -> Option<MarketStats> {
        self.trackers.lock().await.markets.get(market_id).cloned()
    }
}

impl Default for LoggingPriceSink {
    fn default() -> Self {
        Self::new(SUMMARY_PERIOD)
    }
}

#[async_trait]
impl PriceSink for LoggingPriceSink {
    async fn update_index_price(&self, market_id: &str, price: f64) -> Result<()> {
        debug!(market_id, price, "Index price update");
        self.record(market_id, price, Utc::now()).await;
        Ok(())
    }
}
