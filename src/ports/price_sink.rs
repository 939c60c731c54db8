//! Price Sink Port - Downstream Consumer of Accepted Prices
//!
//! The market price services call the sink once per accepted tick.
//! What the sink does with the price (persist, broadcast, log) is
//! outside the oracle's concern.

use async_trait::async_trait;

/// Receiver of accepted composite prices.
#[async_trait]
pub trait PriceSink: Send + Sync + 'static {
  /// Publish the accepted index price for a market.
  ///
  /// Called synchronously from the owning market price service; an error
  /// is logged by the caller and never retried.
  async fn update_index_price(&self, market_id: &str, price: f64) -> anyhow::Result<()>;
}
