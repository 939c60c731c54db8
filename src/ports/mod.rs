//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) the connectors and use cases
//! require from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `StreamCodec` / `PollCodec`: exchange wire formats
//! - `LatestPrices` / `SourceBuilder`: running exchange sources
//! - `PriceSink`: downstream consumer of accepted prices
//! - `ConsensusMetrics`: consensus outcome counters

pub mod consensus_metrics;
pub mod exchange_codec;
pub mod price_sink;
pub mod price_source;

pub use consensus_metrics::{ConsensusMetrics, NoopMetrics};
pub use exchange_codec::{CodecError, Frame, PollCodec, PollRequest, RawFrame, StreamCodec};
pub use price_sink::PriceSink;
pub use price_source::{LatestPrices, SourceBuilder, SourceMarket, SourceSnapshot, SourceSpec};
