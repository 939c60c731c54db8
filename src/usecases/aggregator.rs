//! Aggregator - Shared Sampling Loop over All Markets
//!
//! On every tick, for each market:
//! 1. Read the latest sample of every source covering the market
//! 2. Drop samples older than the market's max use age
//! 3. Hand the surviving prices to the market's price service
//!
//! Each market has a single-slot channel. A slot still full at the next
//! tick means the price service fell behind; the aggregator then cancels
//! every task and fails instead of serving stale composites.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::domain::price::MarketId;
use crate::ports::LatestPrices;

/// Fatal aggregator conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregatorError {
  #[error("MARKET_SERVICE_STOPPED: price service of {market_id} did not drain its last tick")]
  ConsumerStalled { market_id: MarketId },

  #[error("MARKET_SERVICE_STOPPED: price service of {market_id} is gone")]
  ConsumerGone { market_id: MarketId },
}

/// All sources of one market plus its outbound channel.
pub struct MarketFeedSet {
  pub market_id: MarketId,
  /// Oldest a sample may be and still be forwarded.
  pub max_use_age: Duration,
  pub sources: Vec<Arc<dyn LatestPrices>>,
  pub tx: mpsc::Sender<Vec<f64>>,
}

impl MarketFeedSet {
  /// Prices of all sources no older than the max use age.
  pub fn fresh_prices(&self, now: DateTime<Utc>) -> Vec<f64> {
    self
      .sources
      .iter()
      .filter_map(|source| source.latest(&self.market_id))
      .filter(|sample| sample.age_at(now) <= self.max_use_age)
      .map(|sample| sample.price)
      .collect()
  }
}

/// Single sampling task shared by all markets.
pub struct Aggregator {
  markets: Vec<MarketFeedSet>,
  interval: Duration,
}

impl Aggregator {
  pub fn new(markets: Vec<MarketFeedSet>, interval: Duration) -> Self {
    Self { markets, interval }
  }

  /// One sampling pass at `now`.
  ///
  /// Returns the number of markets that received prices.
  pub fn sample_once(&self, now: DateTime<Utc>) -> Result<usize, AggregatorError> {
    let mut forwarded = 0;
    for market in &self.markets {
      let prices = market.fresh_prices(now);
      if prices.is_empty() {
        debug!(market_id = %market.market_id, "No fresh prices");
        continue;
      }

      match market.tx.try_send(prices) {
        Ok(()) => forwarded += 1,
        Err(TrySendError::Full(_)) => {
          return Err(AggregatorError::ConsumerStalled {
            market_id: market.market_id.clone(),
          });
        }
        Err(TrySendError::Closed(_)) => {
          return Err(AggregatorError::ConsumerGone {
            market_id: market.market_id.clone(),
          });
        }
      }
    }
    Ok(forwarded)
  }

  /// Sample on every tick until cancelled.
  ///
  /// A stalled consumer cancels `cancel` and ends the loop with the error.
  #[instrument(skip_all, fields(markets = self.markets.len()))]
  pub async fn run(self, cancel: CancellationToken) -> Result<(), AggregatorError> {
    let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = self.interval.as_millis(), "Aggregator started");

    loop {
      tokio::select! {
        biased;
        () = cancel.cancelled() => {
          info!("Aggregator stopped");
          return Ok(());
        }
        _ = ticker.tick() => {
          if let Err(e) = self.sample_once(Utc::now()) {
            error!(alert = "critical", error = %e, "Aggregator overflow, shutting down");
            cancel.cancel();
            return Err(e);
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::price::PriceTime;
  use std::collections::HashMap;

  struct FixedPrices(HashMap<String, PriceTime>);

  impl LatestPrices for FixedPrices {
    fn latest(&self, market: &str) -> Option<PriceTime> {
      self.0.get(market).copied()
    }
  }

  fn source(market: &str, sample: PriceTime) -> Arc<dyn LatestPrices> {
    Arc::new(FixedPrices(HashMap::from([(market.to_string(), sample)])))
  }

  fn feed_set(
    sources: Vec<Arc<dyn LatestPrices>>,
  ) -> (MarketFeedSet, mpsc::Receiver<Vec<f64>>) {
    let (tx, rx) = mpsc::channel(1);
    let set = MarketFeedSet {
      market_id: "BTC-USDT".to_string(),
      max_use_age: Duration::from_secs(60),
      sources,
      tx,
    };
    (set, rx)
  }

  #[test]
  fn test_stale_samples_dropped() {
    let now = Utc::now();
    let (set, _rx) = feed_set(vec![
      source("BTC-USDT", PriceTime::new(100.0, now - chrono::Duration::seconds(10))),
      source("BTC-USDT", PriceTime::new(101.0, now - chrono::Duration::seconds(61))),
      source("BTC-USDT", PriceTime::new(102.0, now - chrono::Duration::seconds(60))),
      source("ETH-USDT", PriceTime::new(2000.0, now)),
    ]);

    assert_eq!(set.fresh_prices(now), vec![100.0, 102.0]);
  }

  #[test]
  fn test_empty_tick_not_forwarded() {
    let now = Utc::now();
    let (set, mut rx) = feed_set(vec![source(
      "BTC-USDT",
      PriceTime::new(100.0, now - chrono::Duration::seconds(600)),
    )]);
    let aggregator = Aggregator::new(vec![set], Duration::from_secs(5));

    assert_eq!(aggregator.sample_once(now), Ok(0));
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_undrained_slot_is_fatal() {
    let now = Utc::now();
    let (set, mut rx) = feed_set(vec![source("BTC-USDT", PriceTime::new(100.0, now))]);
    let aggregator = Aggregator::new(vec![set], Duration::from_secs(5));

    assert_eq!(aggregator.sample_once(now), Ok(1));
    assert_eq!(
      aggregator.sample_once(now),
      Err(AggregatorError::ConsumerStalled {
        market_id: "BTC-USDT".to_string()
      })
    );

    // draining the slot lets the next tick through
    assert_eq!(rx.try_recv().unwrap(), vec![100.0]);
    assert_eq!(aggregator.sample_once(now), Ok(1));
  }

  #[test]
  fn test_error_message_carries_alert_marker() {
    let err = AggregatorError::ConsumerStalled {
      market_id: "BTC-USDT".to_string(),
    };
    assert!(err.to_string().starts_with("MARKET_SERVICE_STOPPED"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_run_cancels_token_on_overflow() {
    let now = Utc::now();
    let (set, _rx) = feed_set(vec![source("BTC-USDT", PriceTime::new(100.0, now))]);
    let aggregator = Aggregator::new(vec![set], Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let result = aggregator.run(cancel.clone()).await;

    assert!(matches!(result, Err(AggregatorError::ConsumerStalled { .. })));
    assert!(cancel.is_cancelled());
  }

  #[tokio::test]
  async fn test_run_stops_on_cancel() {
    let aggregator = Aggregator::new(Vec::new(), Duration::from_secs(5));
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(aggregator.run(cancel).await, Ok(()));
  }
}
