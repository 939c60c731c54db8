//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to verify that the consensus helpers maintain
//! their invariants across random inputs.

use proptest::prelude::*;

use market_price_oracle::domain::consensus::{
    check_consistency, close_enough, median, ConsensusState, MAX_REJECTED_RUN_LENGTH,
};

fn prices() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1.0e6f64..1.0e6, 1..40)
}

// ── Median Properties ───────────────────────────────────────

proptest! {
    /// The median does not depend on input order.
    #[test]
    fn median_order_independent(values in prices()) {
        let mut reversed = values.clone();
        reversed.reverse();
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);

        let m = median(&values);
        prop_assert_eq!(m, median(&reversed));
        prop_assert_eq!(m, median(&sorted));
    }

    /// The median lies between the minimum and maximum input.
    #[test]
    fn median_bounded_by_extremes(values in prices()) {
        let m = median(&values);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(min <= m && m <= max, "median {m} outside [{min}, {max}]");
    }

    /// Odd-length inputs have a median that is one of the inputs.
    #[test]
    fn odd_median_is_an_input(values in prop::collection::vec(-1.0e6f64..1.0e6, 1..20)) {
        let odd = if values.len() % 2 == 0 { &values[1..] } else { &values[..] };
        let m = median(odd);
        prop_assert!(odd.contains(&m));
    }
}

// ── Tolerance Properties ────────────────────────────────────

proptest! {
    /// Every positive target is close to itself.
    #[test]
    fn close_enough_reflexive(target in 1.0e-6f64..1.0e6, tol in 0.0f64..1.0) {
        prop_assert!(close_enough(target, target, tol));
    }

    /// A larger tolerance never turns a match into a mismatch.
    #[test]
    fn close_enough_monotonic_in_tolerance(
        value in 0.0f64..1000.0,
        target in 1.0f64..1000.0,
        tol in 0.0f64..0.5,
        extra in 0.0f64..0.5,
    ) {
        if close_enough(value, target, tol) {
            prop_assert!(close_enough(value, target, tol + extra));
        }
    }

    /// A zero target only matches zero.
    #[test]
    fn close_enough_zero_target(value in -1.0f64..1.0, tol in 0.0f64..10.0) {
        prop_assert_eq!(close_enough(value, 0.0, tol), value == 0.0);
    }

    /// Identical values are always consistent.
    #[test]
    fn identical_values_consistent(price in 0.01f64..1.0e6, n in 2usize..10) {
        let (m, consistent) = check_consistency(&vec![price; n]);
        prop_assert!(consistent);
        prop_assert_eq!(m, price);
    }
}

// ── Consensus State Properties ──────────────────────────────

proptest! {
    /// However large the jump, the feed never stalls for more than the
    /// allowed run of rejections.
    #[test]
    fn forced_acceptance_bounds_rejections(
        first in 1.0f64..1000.0,
        factor in 2.0f64..100.0,
    ) {
        let mut state = ConsensusState::new();
        prop_assert!(state.evaluate(&[first]).is_ok());

        let jumped = first * factor;
        let mut rejected = 0;
        loop {
            match state.evaluate(&[jumped]) {
                Ok(accepted) => {
                    prop_assert!(accepted.forced);
                    prop_assert_eq!(accepted.price, jumped);
                    break;
                }
                Err(_) => rejected += 1,
            }
        }
        prop_assert_eq!(rejected, MAX_REJECTED_RUN_LENGTH + 1);
        prop_assert_eq!(state.rejected_run_length(), 0);
    }
}
