//! Exchange Price Feeds - Codecs, Connectors and Price Stores
//!
//! Streaming exchanges (WebSocket):
//! - Binance, Coinbase (`cb`, `cb2`), OKX, Kraken
//!
//! Polling providers (REST, prices converted via a reference coin):
//! - CoinGecko, GeckoTerminal, CoinMarketCap
//!
//! Each exchange contributes only a codec; `StreamingConnector` and
//! `PollingConnector` own the transport and write into a `PriceStore`.
//! `SourceRegistry` maps exchange ids to connector builders.

pub mod backoff;
pub mod binance;
pub mod coinbase;
pub mod coingecko;
pub mod coinmarketcap;
pub mod geckoterminal;
pub mod kraken;
pub mod okx;
pub mod polling;
pub mod price_store;
pub mod registry;
pub mod streaming;
pub mod wire;

pub use polling::{PollSettings, PollingConnector};
pub use price_store::PriceStore;
pub use registry::SourceRegistry;
pub use streaming::{StreamSettings, StreamingConnector};

/// Log marker for markets without fresh data; alerting keys on it.
pub const NO_PRICE_DATA: &str = "NO_PRICE_DATA";
