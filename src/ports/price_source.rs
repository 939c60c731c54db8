//! Price Source Port - Connector Output Consumed by the Aggregator
//!
//! A price source is one running exchange connector. It exposes the
//! latest sample per market through `LatestPrices`; the aggregator only
//! ever reads. `SourceBuilder` turns a per-exchange `SourceSpec` into a
//! running source, keeping the wiring code free of concrete adapters.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::price::{ExchangeId, MarketId, PriceTime, Ticker};

/// Read access to a source's latest samples.
pub trait LatestPrices: Send + Sync + 'static {
  /// Latest sample for `market`, `None` if nothing was stored yet.
  fn latest(&self, market: &str) -> Option<PriceTime>;
}

/// One market as seen by one exchange source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMarket {
  /// The exchange's ticker for this market.
  pub ticker: Ticker,
  /// Factor applied to every raw price (e.g. 1000 for "1000PEPE" markets).
  pub multiplier: f64,
  /// Oldest a sample may be and still count.
  pub max_use_age: Duration,
}

/// Everything needed to start one exchange source.
#[derive(Debug, Clone)]
pub struct SourceSpec {
  /// Exchange id from configuration.
  pub exchange_id: ExchangeId,
  /// Markets this exchange covers.
  pub markets: BTreeMap<MarketId, SourceMarket>,
  /// Reference coin tickers on this exchange (REST providers only).
  pub reference: Vec<Ticker>,
  /// REST read interval.
  pub read_interval: Duration,
  /// REST request timeout.
  pub read_timeout: Duration,
  /// API key for providers that need one (empty otherwise).
  pub api_key: String,
}

/// A running source as handed to the aggregator.
#[derive(Clone)]
pub struct SourceSnapshot {
  /// Markets this source covers.
  pub markets: HashSet<MarketId>,
  /// Latest samples written by the source.
  pub prices: Arc<dyn LatestPrices>,
  /// Endpoint URL(s), for logging.
  pub urls: Vec<String>,
}

impl std::fmt::Debug for SourceSnapshot {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SourceSnapshot")
      .field("markets", &self.markets)
      .field("urls", &self.urls)
      .finish_non_exhaustive()
  }
}

/// Builds and starts exchange sources.
pub trait SourceBuilder: Send + Sync {
  /// Start the source described by `spec`.
  ///
  /// Returns `Ok(None)` for an exchange id nobody knows how to build.
  /// The started tasks stop when `cancel` fires.
  fn start_source(
    &self,
    spec: SourceSpec,
    cancel: &CancellationToken,
  ) -> anyhow::Result<Option<SourceSnapshot>>;
}
