//! Metered Sink - Index Price Gauge Decorator

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::adapters::metrics::MetricsRegistry;
use crate::ports::PriceSink;

/// Publishes `oracle_index_price` for every accepted price, then delegates.
pub struct MeteredSink<S> {
    inner: S,
    metrics: Arc<MetricsRegistry>,
}

impl<S: PriceSink> MeteredSink<S> {
    pub fn new(inner: S, metrics: Arc<MetricsRegistry>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl<S: PriceSink> PriceSink for MeteredSink<S> {
    async fn update_index_price(&self, market_id: &str, price: f64) -> Result<()> {
        self.metrics
            .index_price
            .with_label_values(&[market_id])
            .set(price);
        self.inner.update_index_price(market_id, price).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sinks::LoggingPriceSink;

    #[tokio::test]
    async fn test_gauge_set_before_delegating() {
        let metrics = Arc::new(MetricsRegistry::new().unwrap());
        let sink = MeteredSink::new(LoggingPriceSink::default(), Arc::clone(&metrics));

        sink.update_index_price("BTC-USDT", 36012.5).await.unwrap();

        let gauge = metrics.index_price.with_label_values(&["BTC-USDT"]).get();
        assert_eq!(gauge, 36012.5);
    }
}
