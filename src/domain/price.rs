//! Core price domain types.
//!
//! Defines the identities every layer shares: markets, exchange tickers
//! and timestamped price samples. These types carry no transport or
//! runtime dependencies (hexagonal architecture inner ring).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────
// Type aliases consumed by ports and adapters
// ────────────────────────────────────────────

/// Canonical composite-price key (e.g. "BTC-USDT").
pub type MarketId = String;

/// Exchange identifier as used in configuration (e.g. "binance", "cb").
pub type ExchangeId = String;

/// Exchange-native instrument identifier (e.g. "btcusdt@kline_1m", "BTC-USDT").
pub type InstId = String;

/// Identity of one exchange's feed for one instrument.
///
/// Created from configuration at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Exchange this ticker is read from.
    pub exchange_id: ExchangeId,
    /// Instrument id in the exchange's own format.
    pub inst_id: InstId,
    /// Chain/network name, only meaningful for on-chain price providers.
    #[serde(default)]
    pub network: String,
    /// Per-ticker max use age override (seconds), used for feed liveness.
    #[serde(default)]
    pub max_use_age_secs: Option<u64>,
}

impl Ticker {
    /// Build a ticker with no network and no per-ticker age overrides.
    pub fn new(exchange_id: impl Into<ExchangeId>, inst_id: impl Into<InstId>) -> Self {
        Self {
            exchange_id: exchange_id.into(),
            inst_id: inst_id.into(),
            network: String::new(),
            max_use_age_secs: None,
        }
    }

    /// Same as [`Ticker::new`] but on a named network.
    pub fn on_network(
        exchange_id: impl Into<ExchangeId>,
        inst_id: impl Into<InstId>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            network: network.into(),
            ..Self::new(exchange_id, inst_id)
        }
    }
}

/// One observed price sample.
///
/// Immutable value type; the price is already normalized (multiplier and
/// reference conversion applied) by the time it reaches the price store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceTime {
    /// Observed price.
    pub price: f64,
    /// Observation time as reported by the source.
    pub time: DateTime<Utc>,
}

impl PriceTime {
    pub const fn new(price: f64, time: DateTime<Utc>) -> Self {
        Self { price, time }
    }

    /// A sample observed right now.
    pub fn now(price: f64) -> Self {
        Self::new(price, Utc::now())
    }

    /// Age of the sample relative to `now`. Samples from the future are age zero.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        (now - self.time).to_std().unwrap_or(Duration::ZERO)
    }

    /// Age of the sample relative to the wall clock.
    pub fn age(&self) -> Duration {
        self.age_at(Utc::now())
    }

    /// Return a copy with the price scaled by `factor`.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            price: self.price * factor,
            ..self
        }
    }
}
