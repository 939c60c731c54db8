//! Pricing Service - Wiring of Sources, Aggregator and Market Services
//!
//! Startup sequence:
//! 1. Regroup the configured market -> ticker lists into exchange -> market
//! 2. Start one source per exchange through the `SourceBuilder`
//! 3. Create one single-slot channel and `MarketPriceService` per market
//! 4. Start the shared `Aggregator`
//!
//! Markets none of whose exchanges could be started are skipped with a
//! warning; an exchange that fails to start is fatal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::aggregator::{Aggregator, AggregatorError, MarketFeedSet};
use super::market_price_service::MarketPriceService;
use crate::config::OracleConfig;
use crate::domain::price::{ExchangeId, MarketId};
use crate::ports::{
  ConsensusMetrics, LatestPrices, PriceSink, SourceBuilder, SourceMarket, SourceSnapshot,
  SourceSpec,
};

/// Capacity of each market's channel; an undrained slot is fatal.
const MARKET_CHANNEL_CAPACITY: usize = 1;

/// Running pricing tasks.
pub struct PricingService {
  aggregator: JoinHandle<Result<(), AggregatorError>>,
  services: Vec<JoinHandle<()>>,
  markets: Vec<MarketId>,
}

impl PricingService {
  /// Start every source, market service and the aggregator.
  pub fn start(
    config: &OracleConfig,
    builder: &dyn SourceBuilder,
    sink: Arc<dyn PriceSink>,
    metrics: Arc<dyn ConsensusMetrics>,
    cancel: &CancellationToken,
  ) -> Result<Self> {
    let mut snapshots: Vec<SourceSnapshot> = Vec::new();
    for spec in source_specs(config) {
      let exchange_id = spec.exchange_id.clone();
      let started = builder
        .start_source(spec, cancel)
        .with_context(|| format!("Failed to start source {exchange_id}"))?;
      if let Some(snapshot) = started {
        snapshots.push(snapshot);
      }
    }

    let mut feed_sets = Vec::new();
    let mut services = Vec::new();
    let mut markets = Vec::new();
    for market in &config.markets {
      let sources: Vec<Arc<dyn LatestPrices>> = snapshots
        .iter()
        .filter(|snapshot| snapshot.markets.contains(&market.market_id))
        .map(|snapshot| Arc::clone(&snapshot.prices))
        .collect();
      if sources.is_empty() {
        warn!(market_id = %market.market_id, "No running source for market, skipping");
        continue;
      }

      let (tx, rx) = mpsc::channel(MARKET_CHANNEL_CAPACITY);
      let service = MarketPriceService::new(
        market.market_id.clone(),
        rx,
        Arc::clone(&sink),
        Arc::clone(&metrics),
      );
      services.push(tokio::spawn(service.run(cancel.clone())));

      info!(
        market_id = %market.market_id,
        sources = sources.len(),
        "Market wired"
      );
      feed_sets.push(MarketFeedSet {
        market_id: market.market_id.clone(),
        max_use_age: config.max_use_age(market),
        sources,
        tx,
      });
      markets.push(market.market_id.clone());
    }

    anyhow::ensure!(!feed_sets.is_empty(), "No market has a running source");

    let aggregator = Aggregator::new(feed_sets, config.update_interval());
    let aggregator = tokio::spawn(aggregator.run(cancel.clone()));

    Ok(Self {
      aggregator,
      services,
      markets,
    })
  }

  /// Markets that are being priced.
  pub fn markets(&self) -> &[MarketId] {
    &self.markets
  }

  /// Wait for the aggregator, then for every market service.
  ///
  /// Returns the aggregator's error if it stopped on a stalled consumer.
  pub async fn wait(self) -> Result<()> {
    let outcome = self.aggregator.await.context("Aggregator task panicked")?;
    for service in self.services {
      if let Err(e) = service.await {
        warn!(error = %e, "Market price service task failed");
      }
    }
    outcome.map_err(anyhow::Error::from)
  }
}

/// Per-exchange source specs from the per-market configuration.
pub fn source_specs(config: &OracleConfig) -> Vec<SourceSpec> {
  let mut by_exchange: BTreeMap<ExchangeId, BTreeMap<MarketId, SourceMarket>> = BTreeMap::new();

  for market in &config.markets {
    let market_age = config.max_use_age(market);
    for ticker in &market.sources {
      let max_use_age = ticker.max_use_age_secs.map_or(market_age, Duration::from_secs);
      let previous = by_exchange
        .entry(ticker.exchange_id.clone())
        .or_default()
        .insert(
          market.market_id.clone(),
          SourceMarket {
            ticker: ticker.clone(),
            multiplier: market.effective_multiplier(),
            max_use_age,
          },
        );
      if previous.is_some() {
        warn!(
          market_id = %market.market_id,
          exchange = %ticker.exchange_id,
          "Duplicate exchange source for market, keeping the last one"
        );
      }
    }
  }

  by_exchange
    .into_iter()
    .map(|(exchange_id, markets)| {
      let (read_interval, read_timeout) = config.read_timing(&exchange_id);
      SourceSpec {
        reference: config.reference_tickers(&exchange_id),
        api_key: config.api_key(&exchange_id),
        exchange_id,
        markets,
        read_interval,
        read_timeout,
      }
    })
    .collect()
}
