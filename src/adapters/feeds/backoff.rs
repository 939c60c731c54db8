//! Dial Backoff
//!
//! Bounded exponential backoff between dial attempts of one reconnect.
//! Delays are deterministic.

use std::time::Duration;

/// Delay schedule for one reconnect's dial attempts.
#[derive(Debug, Clone)]
pub struct DialBackoff {
    /// Delay returned after the next failure.
    next_delay: Duration,
    /// Failed dials so far.
    failures: u32,
    /// Dials allowed in total.
    max_attempts: u32,
}

impl DialBackoff {
    #[must_use]
    pub const fn new(initial_delay: Duration, max_attempts: u32) -> Self {
        Self {
            next_delay: initial_delay,
            failures: 0,
            max_attempts,
        }
    }

    /// Record a failed dial.
    ///
    /// Returns the delay before the next dial, or `None` once all attempts
    /// are used up. The delay doubles after every failure.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_attempts {
            return None;
        }
        let delay = self.next_delay;
        self.next_delay = self.next_delay.saturating_mul(2);
        Some(delay)
    }

    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}
