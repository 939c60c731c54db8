//! Price Store - Latest Sample per Market for One Source
//!
//! Each connector owns one store and is its only writer; the aggregator
//! reads it on every sampling tick. Backed by `DashMap`, so a reader sees
//! either nothing or a complete `PriceTime`, never a torn value.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::domain::price::{MarketId, PriceTime};
use crate::ports::LatestPrices;

/// Latest price sample per market for a single exchange source.
#[derive(Debug)]
pub struct PriceStore {
    /// Source label used in logs (exchange name or shortened URL).
    source: String,
    /// Latest sample per market.
    latest: DashMap<MarketId, PriceTime>,
}

impl PriceStore {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            latest: DashMap::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Store a sample for `market`.
    ///
    /// Returns `false` if the price equals the stored one; the sample is
    /// then dropped, keeping the older timestamp.
    pub fn store(&self, market: &str, sample: PriceTime) -> bool {
        match self.latest.entry(market.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().price == sample.price {
                    info!(
                        market_id = market,
                        price = sample.price,
                        source = %self.source,
                        "Received unchanged price"
                    );
                    return false;
                }
                entry.insert(sample);
            }
            Entry::Vacant(entry) => {
                entry.insert(sample);
            }
        }
        info!(
            market_id = market,
            price = sample.price,
            source = %self.source,
            "Received price"
        );
        true
    }

    /// Latest sample for `market`, `None` if never written.
    pub fn load(&self, market: &str) -> Option<PriceTime> {
        self.latest.get(market).map(|entry| *entry.value())
    }
}

impl LatestPrices for PriceStore {
    fn latest(&self, market: &str) -> Option<PriceTime> {
        self.load(market)
    }
}
