//! Consensus Metrics Port - Outcome Counters of the Market Services
//!
//! Lets the use cases record consensus outcomes without knowing the
//! metrics backend.

/// Recorder of per-market consensus outcomes.
#[cfg_attr(test, mockall::automock)]
pub trait ConsensusMetrics: Send + Sync + 'static {
  /// A tick produced an accepted price; `forced` if the jump guard was overridden.
  fn tick_accepted(&self, market_id: &str, forced: bool);

  /// A tick was rejected; `reason` is a stable label.
  fn tick_rejected(&self, market_id: &str, reason: &str);

  /// The price sink returned an error.
  fn sink_failed(&self, market_id: &str);
}

/// Recorder that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl ConsensusMetrics for NoopMetrics {
  fn tick_accepted(&self, _market_id: &str, _forced: bool) {}

  fn tick_rejected(&self, _market_id: &str, _reason: &str) {}

  fn sink_failed(&self, _market_id: &str) {}
}
