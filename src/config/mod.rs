//! Configuration Module - TOML-based Oracle Configuration
//!
//! Loads and validates configuration from `config.toml`. API keys are
//! never read from the file: they come from the environment
//! (`COINGECKO_API_KEY`, `COINMARKETCAP_API_KEY`).
//! Markets, tickers and intervals are externalized here - nothing is
//! hardcoded in the domain layer.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::price::{MarketId, Ticker};

/// Top-level oracle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OracleConfig {
  /// Service identity.
  pub oracle: ServiceConfig,
  /// Sampling and default timing.
  #[serde(default)]
  pub pricing: PricingConfig,
  /// Coin to exchange ticker mapping, used to find reference tickers.
  #[serde(default)]
  pub coins: Vec<CoinConfig>,
  /// Per-exchange overrides.
  #[serde(default)]
  pub exchanges: Vec<ExchangeConfig>,
  /// Composite markets and their sources.
  pub markets: Vec<MarketConfig>,
  /// Metrics and health endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Provider API keys, filled from the environment by the loader.
  #[serde(skip)]
  pub api_keys: ApiKeys,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Sampling and default timing.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
  /// Aggregator sampling interval.
  #[serde(default = "default_update_interval")]
  pub update_interval_secs: u64,
  /// Max use age of markets without their own.
  #[serde(default = "default_max_use_age")]
  pub default_max_use_age_secs: u64,
  /// Coin every polled price is converted into.
  #[serde(default = "default_reference_coin")]
  pub reference_coin: String,
  /// REST read interval of exchanges without their own.
  #[serde(default = "default_read_interval")]
  pub default_read_interval_secs: u64,
  /// REST timeout of exchanges without their own.
  #[serde(default = "default_read_timeout")]
  pub default_read_timeout_secs: u64,
}

impl Default for PricingConfig {
  fn default() -> Self {
    Self {
      update_interval_secs: default_update_interval(),
      default_max_use_age_secs: default_max_use_age(),
      reference_coin: default_reference_coin(),
      default_read_interval_secs: default_read_interval(),
      default_read_timeout_secs: default_read_timeout(),
    }
  }
}

/// One coin and its instrument id on each exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinConfig {
  pub coin_id: String,
  #[serde(default)]
  pub tickers: Vec<Ticker>,
}

/// Per-exchange REST timing overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
  pub exchange_id: String,
  pub read_interval_secs: Option<u64>,
  pub read_timeout_secs: Option<u64>,
}

/// One composite market.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
  /// Composite price key (e.g. "BTC-USDT").
  pub market_id: MarketId,
  /// Factor applied to every source price; 0 means 1.
  #[serde(default = "default_multiplier")]
  pub multiplier: f64,
  /// Oldest a sample may be and still be used.
  pub max_use_age_secs: Option<u64>,
  /// Exchange tickers feeding this market.
  #[serde(default)]
  pub sources: Vec<Ticker>,
}

impl MarketConfig {
  /// Multiplier with the 0-means-1 rule applied.
  pub fn effective_multiplier(&self) -> f64 {
    if self.multiplier == 0.0 {
      1.0
    } else {
      self.multiplier
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Serve `/metrics`, `/live` and `/ready`.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
    }
  }
}

/// Provider API keys.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
  pub coingecko: String,
  pub coinmarketcap: String,
}

impl OracleConfig {
  pub fn update_interval(&self) -> Duration {
    Duration::from_secs(self.pricing.update_interval_secs)
  }

  pub fn max_use_age(&self, market: &MarketConfig) -> Duration {
    Duration::from_secs(
      market
        .max_use_age_secs
        .unwrap_or(self.pricing.default_max_use_age_secs),
    )
  }

  /// REST read interval and timeout of `exchange_id`.
  pub fn read_timing(&self, exchange_id: &str) -> (Duration, Duration) {
    let exchange = self.exchanges.iter().find(|e| e.exchange_id == exchange_id);
    let interval = exchange
      .and_then(|e| e.read_interval_secs)
      .unwrap_or(self.pricing.default_read_interval_secs);
    let timeout = exchange
      .and_then(|e| e.read_timeout_secs)
      .unwrap_or(self.pricing.default_read_timeout_secs);
    (Duration::from_secs(interval), Duration::from_secs(timeout))
  }

  /// Tickers of the reference coin on `exchange_id`.
  pub fn reference_tickers(&self, exchange_id: &str) -> Vec<Ticker> {
    self
      .coins
      .iter()
      .filter(|coin| coin.coin_id == self.pricing.reference_coin)
      .flat_map(|coin| coin.tickers.iter())
      .filter(|ticker| ticker.exchange_id == exchange_id)
      .cloned()
      .collect()
  }

  /// API key for `exchange_id`, empty if it needs none.
  pub fn api_key(&self, exchange_id: &str) -> String {
    match exchange_id {
      "coingecko" | "geckoterminal" => self.api_keys.coingecko.clone(),
      "coinmarketcap" => self.api_keys.coinmarketcap.clone(),
      _ => String::new(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_update_interval() -> u64 {
  5
}

fn default_max_use_age() -> u64 {
  60
}

fn default_reference_coin() -> String {
  "USDT".to_string()
}

fn default_read_interval() -> u64 {
  25
}

fn default_read_timeout() -> u64 {
  20
}

fn default_multiplier() -> f64 {
  1.0
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}
