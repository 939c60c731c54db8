//! Consensus price algorithm.
//!
//! Turns one tick's worth of per-source prices into a single accepted
//! composite price, or a rejection. Two filters run in sequence:
//!
//! 1. Cross-source consistency: with more than one new sample, at least two
//!    candidate values must lie within 5% of the candidate median. The
//!    previously accepted price takes part as an extra vote; if the check
//!    fails with it, it is repeated on the new samples alone.
//! 2. Jump guard: the composite must lie within 10% of the last accepted
//!    price, unless nothing was accepted yet or more than 10 consecutive
//!    ticks have already been rejected (forced acceptance).
//!
//! The state is owned by exactly one market price service task, so no
//! locking is involved.

use thiserror::Error;

/// Relative tolerance for agreement between sources.
pub const CONSISTENCY_TOLERANCE: f64 = 0.05;

/// Relative tolerance for the jump guard against the last accepted price.
pub const JUMP_TOLERANCE: f64 = 0.10;

/// Rejected run length after which the next candidate is accepted regardless.
pub const MAX_REJECTED_RUN_LENGTH: u32 = 10;

/// Why a tick did not produce a composite price.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsensusRejection {
    #[error("inconsistent price data, fewer than 2 values within 5% of median {median}")]
    Inconsistent { median: f64 },

    #[error("found no usable data")]
    NoUsableData,

    #[error(
        "price jump, last accepted {last_accepted}, rejected {candidate}, run length {run_length}"
    )]
    PriceJump {
        last_accepted: f64,
        candidate: f64,
        run_length: u32,
    },
}

impl ConsensusRejection {
    /// Short label used for metrics.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Inconsistent { .. } => "inconsistent",
            Self::NoUsableData => "no_usable_data",
            Self::PriceJump { .. } => "price_jump",
        }
    }
}

/// An accepted composite price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accepted {
    /// The composite price to publish.
    pub price: f64,
    /// Number of samples the composite was computed from.
    pub num_sources: usize,
    /// True when only the rejected-run limit let this price through.
    pub forced: bool,
}

/// Per-market consensus state.
#[derive(Debug, Clone, Default)]
pub struct ConsensusState {
    /// Last composite price that was accepted and published.
    last_accepted: Option<f64>,
    /// Consecutive jump-guard rejections since the last acceptance.
    rejected_run_length: u32,
}

impl ConsensusState {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn last_accepted(&self) -> Option<f64> {
        self.last_accepted
    }

    pub const fn rejected_run_length(&self) -> u32 {
        self.rejected_run_length
    }

    /// Run the consensus algorithm for one tick.
    ///
    /// On acceptance the state remembers the new price and resets the
    /// rejected run length. A jump-guard rejection increments the run
    /// length; consistency rejections leave the state untouched.
    pub fn evaluate(&mut self, inputs: &[f64]) -> Result<Accepted, ConsensusRejection> {
        let (candidate, num_sources) = self.combined_price(inputs)?;

        let within_jump = match self.last_accepted {
            None => true,
            Some(last) => close_enough(candidate, last, JUMP_TOLERANCE),
        };
        let forced = !within_jump && self.rejected_run_length > MAX_REJECTED_RUN_LENGTH;

        if within_jump || forced {
            self.last_accepted = Some(candidate);
            self.rejected_run_length = 0;
            return Ok(Accepted {
                price: candidate,
                num_sources,
                forced,
            });
        }

        self.rejected_run_length += 1;
        Err(ConsensusRejection::PriceJump {
            last_accepted: self.last_accepted.unwrap_or_default(),
            candidate,
            run_length: self.rejected_run_length,
        })
    }

    /// Raw composite for this tick: median of the usable new samples.
    fn combined_price(&self, inputs: &[f64]) -> Result<(f64, usize), ConsensusRejection> {
        let mut candidates = Vec::with_capacity(inputs.len() + 1);
        candidates.extend(self.last_accepted);
        candidates.extend_from_slice(inputs);

        let single_source = inputs.len() == 1;
        let mut median1 = 0.0;
        if inputs.len() > 1 {
            let (median, mut consistent) = check_consistency(&candidates);
            median1 = median;
            // the previous price may be the outlier, not the new data
            if !consistent && self.last_accepted.is_some() {
                (median1, consistent) = check_consistency(inputs);
            }
            if !consistent {
                return Err(ConsensusRejection::Inconsistent { median: median1 });
            }
        }

        let usable: Vec<f64> = inputs
            .iter()
            .copied()
            .filter(|&price| single_source || close_enough(price, median1, CONSISTENCY_TOLERANCE))
            .collect();

        if usable.is_empty() {
            return Err(ConsensusRejection::NoUsableData);
        }
        Ok((median(&usable), usable.len()))
    }
}

/// Median of `values`: middle value for odd counts, mean of the two middle
/// values for even counts, 0 for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let len = sorted.len();
    if len == 0 {
        0.0
    } else if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

/// True if `value` is within `tolerance` of `target`, relative to `target`.
///
/// The denominator is always `target`, so the relation is not symmetric.
/// A zero target only matches a zero value.
pub fn close_enough(value: f64, target: f64, tolerance: f64) -> bool {
    if target == 0.0 {
        return value == 0.0;
    }
    ((value - target) / target).abs() <= tolerance
}

/// Median of `values` and whether at least two of them lie within 5% of it.
///
/// Fewer than two values are trivially consistent.
pub fn check_consistency(values: &[f64]) -> (f64, bool) {
    let median1 = median(values);
    if values.len() < 2 {
        return (median1, true);
    }
    let agreeing = values
        .iter()
        .filter(|&&value| close_enough(value, median1, CONSISTENCY_TOLERANCE))
        .take(2)
        .count();
    (median1, agreeing >= 2)
}
