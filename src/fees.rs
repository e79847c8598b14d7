//! Turnover-proportional transaction costs.

use crate::types::Weights;
use serde::{Deserialize, Serialize};

/// Turnover and cost factor of one rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeOutcome {
    /// Sum of absolute weight changes, in [0, 2].
    pub turnover: f64,
    /// Multiplier applied to the day's equity growth, in [0, 1].
    pub cost_factor: f64,
}

impl FeeOutcome {
    /// Outcome of a day without a rebalance.
    pub const NO_TRADE: FeeOutcome = FeeOutcome {
        turnover: 0.0,
        cost_factor: 1.0,
    };
}

/// Sum of absolute differences between two weight vectors.
///
/// Unlike a buy/sell-split convention, this is not halved: swapping the whole
/// portfolio from one asset into another is a turnover of 2.0.
pub fn turnover(prev: &Weights, new: &Weights) -> f64 {
    prev.as_slice()
        .iter()
        .zip(new.as_slice())
        .map(|(p, n)| (n - p).abs())
        .sum()
}

/// Charge `fee_rate` per unit of turnover against the day's growth.
///
/// The cost factor saturates at zero: a fee large enough to exceed the
/// portfolio wipes it out rather than producing negative equity.
pub fn apply_fee(prev: &Weights, new: &Weights, fee_rate: f64) -> FeeOutcome {
    let turnover = turnover(prev, new);
    FeeOutcome {
        turnover,
        cost_factor: (1.0 - fee_rate * turnover).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_swap_costs_twice_the_rate() {
        let prev = Weights::from_vec(vec![1.0, 0.0]);
        let new = Weights::from_vec(vec![0.0, 1.0]);
        let outcome = apply_fee(&prev, &new, 0.001);
        assert_eq!(outcome.turnover, 2.0);
        assert!((outcome.cost_factor - 0.998).abs() < 1e-15);
    }

    #[test]
    fn test_unchanged_weights_are_free() {
        let w = Weights::equal(3);
        let outcome = apply_fee(&w, &w, 0.01);
        assert_eq!(outcome, FeeOutcome::NO_TRADE);
    }

    #[test]
    fn test_cost_factor_floors_at_zero() {
        let prev = Weights::from_vec(vec![1.0, 0.0]);
        let new = Weights::from_vec(vec![0.0, 1.0]);
        let outcome = apply_fee(&prev, &new, 0.9);
        assert_eq!(outcome.cost_factor, 0.0);
    }

    #[test]
    fn test_partial_turnover() {
        let prev = Weights::equal(3);
        let new = Weights::from_vec(vec![0.6, 0.2, 0.2]);
        let t = turnover(&prev, &new);
        let third = 1.0 / 3.0;
        let expected = (0.6 - third) + 2.0 * (third - 0.2);
        assert!((t - expected).abs() < 1e-12);
    }
}
