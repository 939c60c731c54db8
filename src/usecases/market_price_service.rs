//! Market Price Service - Per-Market Consensus Consumer
//!
//! One task per market. Receives the aggregator's price lists in order,
//! runs them through the market's `ConsensusState` and publishes every
//! accepted price to the sink exactly once. Rejections are logged and
//! counted, never retried.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::consensus::{Accepted, ConsensusRejection, ConsensusState};
use crate::domain::price::MarketId;
use crate::ports::{ConsensusMetrics, PriceSink};

/// Consensus consumer of one market.
pub struct MarketPriceService {
  market_id: MarketId,
  rx: mpsc::Receiver<Vec<f64>>,
  state: ConsensusState,
  sink: Arc<dyn PriceSink>,
  metrics: Arc<dyn ConsensusMetrics>,
}

impl MarketPriceService {
  pub fn new(
    market_id: MarketId,
    rx: mpsc::Receiver<Vec<f64>>,
    sink: Arc<dyn PriceSink>,
    metrics: Arc<dyn ConsensusMetrics>,
  ) -> Self {
    Self {
      market_id,
      rx,
      state: ConsensusState::new(),
      sink,
      metrics,
    }
  }

  pub fn market_id(&self) -> &str {
    &self.market_id
  }

  /// Consume ticks until cancelled or the aggregator is gone.
  #[instrument(skip(self, cancel), fields(market_id = %self.market_id))]
  pub async fn run(mut self, cancel: CancellationToken) {
    info!("Market price service started");
    loop {
      tokio::select! {
        biased;
        () = cancel.cancelled() => break,
        tick = self.rx.recv() => match tick {
          // a sink call still pending at shutdown is abandoned
          Some(prices) => tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = self.process(&prices) => {}
          },
          None => break,
        },
      }
    }
    info!("Market price service stopped");
  }

  /// Evaluate one tick and publish an accepted price.
  pub async fn process(&mut self, prices: &[f64]) -> Option<Accepted> {
    match self.state.evaluate(prices) {
      Ok(accepted) => {
        if accepted.forced {
          warn!(
            market_id = %self.market_id,
            price = accepted.price,
            "Forced acceptance after too many rejected ticks"
          );
        } else {
          debug!(
            market_id = %self.market_id,
            price = accepted.price,
            sources = accepted.num_sources,
            "Accepted price"
          );
        }
        self.metrics.tick_accepted(&self.market_id, accepted.forced);

        if let Err(e) = self.sink.update_index_price(&self.market_id, accepted.price).await {
          error!(
            alert = "critical",
            market_id = %self.market_id,
            price = accepted.price,
            error = %e,
            "Error updating index price"
          );
          self.metrics.sink_failed(&self.market_id);
        }
        Some(accepted)
      }
      Err(rejection) => {
        self.log_rejection(prices, &rejection);
        self.metrics.tick_rejected(&self.market_id, rejection.reason());
        None
      }
    }
  }

  fn log_rejection(&self, prices: &[f64], rejection: &ConsensusRejection) {
    match rejection {
      ConsensusRejection::Inconsistent { median } => warn!(
        market_id = %self.market_id,
        median,
        prices = ?prices,
        "Inconsistent price data"
      ),
      ConsensusRejection::NoUsableData => warn!(
        market_id = %self.market_id,
        prices = ?prices,
        "Found no usable data"
      ),
      ConsensusRejection::PriceJump {
        last_accepted,
        candidate,
        run_length,
      } => warn!(
        market_id = %self.market_id,
        last_accepted,
        candidate,
        run_length,
        "Price jump rejected"
      ),
    }
  }
}

#[cfg(test)]
mod tests {
  use anyhow::Result;
  use async_trait::async_trait;
  use tokio::sync::Mutex;

  use super::*;
  use crate::ports::consensus_metrics::MockConsensusMetrics;
  use crate::ports::NoopMetrics;

  #[derive(Default)]
  struct RecordingSink {
    published: Mutex<Vec<(String, f64)>>,
    fail: bool,
  }

  #[async_trait]
  impl PriceSink for RecordingSink {
    async fn update_index_price(&self, market_id: &str, price: f64) -> Result<()> {
      self.published.lock().await.push((market_id.to_string(), price));
      if self.fail {
        anyhow::bail!("sink unavailable");
      }
      Ok(())
    }
  }

  fn service(
    sink: Arc<RecordingSink>,
    metrics: Arc<dyn ConsensusMetrics>,
  ) -> (MarketPriceService, mpsc::Sender<Vec<f64>>) {
    let (tx, rx) = mpsc::channel(1);
    (
      MarketPriceService::new("BTC-USDT".to_string(), rx, sink, metrics),
      tx,
    )
  }

  #[tokio::test]
  async fn test_accepted_prices_published_once() {
    let sink = Arc::new(RecordingSink::default());
    let (mut service, _tx) = service(Arc::clone(&sink), Arc::new(NoopMetrics));

    service.process(&[1345.6, 1344.6]).await;
    // jump > 10%, rejected
    service.process(&[1098.3, 1097.3]).await;
    service.process(&[1345.7, 1346.7]).await;

    let published = sink.published.lock().await.clone();
    assert_eq!(published.len(), 2);
    assert!(published.iter().all(|(market, _)| market == "BTC-USDT"));
    assert!((published[0].1 - 1345.1).abs() < 1e-9);
    assert!((published[1].1 - 1346.2).abs() < 1e-9);
  }

  #[tokio::test]
  async fn test_rejection_recorded_with_reason() {
    let mut metrics = MockConsensusMetrics::new();
    metrics
      .expect_tick_accepted()
      .withf(|market, forced| market == "BTC-USDT" && !forced)
      .times(1)
      .return_const(());
    metrics
      .expect_tick_rejected()
      .withf(|market, reason| market == "BTC-USDT" && reason == "inconsistent")
      .times(1)
      .return_const(());

    let sink = Arc::new(RecordingSink::default());
    let (mut service, _tx) = service(Arc::clone(&sink), Arc::new(metrics));

    assert!(service.process(&[100.0]).await.is_some());
    assert!(service.process(&[1.0, 2.0, 3.0]).await.is_none());
  }

  #[tokio::test]
  async fn test_sink_failure_keeps_state() {
    let mut metrics = MockConsensusMetrics::new();
    metrics.expect_tick_accepted().times(2).return_const(());
    metrics.expect_sink_failed().times(2).return_const(());

    let sink = Arc::new(RecordingSink {
      fail: true,
      ..RecordingSink::default()
    });
    let (mut service, _tx) = service(Arc::clone(&sink), Arc::new(metrics));

    assert!(service.process(&[100.0]).await.is_some());
    // still compared against the failed publication
    assert_eq!(service.process(&[105.0]).await.map(|a| a.price), Some(105.0));
  }

  #[tokio::test]
  async fn test_run_consumes_until_sender_dropped() {
    let sink = Arc::new(RecordingSink::default());
    let (service, tx) = service(Arc::clone(&sink), Arc::new(NoopMetrics));
    let handle = tokio::spawn(service.run(CancellationToken::new()));

    tx.send(vec![100.0]).await.unwrap();
    tx.send(vec![101.0]).await.unwrap();
    drop(tx);
    handle.await.unwrap();

    assert_eq!(sink.published.lock().await.len(), 2);
  }
}
