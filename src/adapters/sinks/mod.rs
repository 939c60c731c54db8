//! Price Sink Adapters
//!
//! - `LoggingPriceSink`: standalone sink logging periodic per-market summaries
//! - `MeteredSink`: decorator publishing the index price gauge

pub mod logging;
pub mod metered;

pub use logging::LoggingPriceSink;
pub use metered::MeteredSink;
