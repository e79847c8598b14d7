//! Weight policies: how a strategy turns price history into target weights.
//!
//! A policy is only consulted on rebalance dates. It sees history up to and
//! including the decision date and nothing after it; [`PolicyContext`] is
//! built from slices that end at the decision row.
//!
//! Built-in policies:
//! - [`EqualWeight`]: 1/N per asset
//! - [`MomentumTop1`]: overweight the best trailing performer
//! - [`InverseVolatilityCapped`]: inverse-volatility weights with a cap on one asset

use crate::analytics::TRADING_DAYS_PER_YEAR;
use crate::data::PriceTable;
use crate::types::{AssetBasket, Weights};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// History visible to a policy at one decision date.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    /// Calendar position of the decision date.
    pub index: usize,
    pub basket: &'a AssetBasket,
    /// Price rows `0..=index`.
    pub prices: &'a [Vec<f64>],
    /// Return rows `0..=index`; row 0 is the zero seed row.
    pub returns: &'a [Vec<f64>],
}

impl<'a> PolicyContext<'a> {
    /// View of `table` as of calendar position `index`.
    pub fn new(table: &'a PriceTable, index: usize) -> Self {
        Self {
            index,
            basket: table.basket(),
            prices: &table.prices()[..=index],
            returns: &table.returns()[..=index],
        }
    }

    pub fn num_assets(&self) -> usize {
        self.basket.len()
    }

    /// `price(t) / price(t - lookback) - 1`, if that far back exists and is finite.
    pub fn trailing_return(&self, asset: usize, lookback: usize) -> Option<f64> {
        let past = self.index.checked_sub(lookback)?;
        let value = self.prices[self.index][asset] / self.prices[past][asset] - 1.0;
        value.is_finite().then_some(value)
    }

    /// Annualized sample standard deviation of the last `lookback` daily returns.
    ///
    /// The window never includes the seed row, so at least `lookback` real
    /// returns must exist before the decision date.
    pub fn trailing_volatility(&self, asset: usize, lookback: usize) -> Option<f64> {
        if lookback < 2 || self.index < lookback {
            return None;
        }
        let window = &self.returns[self.index + 1 - lookback..=self.index];
        let n = window.len() as f64;
        let mean = window.iter().map(|row| row[asset]).sum::<f64>() / n;
        let variance = window
            .iter()
            .map(|row| (row[asset] - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let vol = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
        vol.is_finite().then_some(vol)
    }
}

/// Trait for portfolio weight policies.
pub trait WeightPolicy: Send + Sync {
    /// Returns the name of the policy.
    fn name(&self) -> &str;

    /// Calendar positions below this are never acted on.
    fn warmup_period(&self) -> usize {
        0
    }

    /// Compute target weights from history up to the decision date.
    fn compute_weights(&self, ctx: &PolicyContext) -> Weights;
}

/// 1/N for every asset.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualWeight;

impl WeightPolicy for EqualWeight {
    fn name(&self) -> &str {
        "Equal Weight"
    }

    fn compute_weights(&self, ctx: &PolicyContext) -> Weights {
        Weights::equal(ctx.num_assets())
    }
}

/// Trailing-return ranking with a fixed overweight on the leader.
///
/// The top asset gets `top_weight`; the remainder is split evenly across the
/// rest. Ties go to the asset that comes first in the basket. If any asset
/// has no defined score the policy falls back to equal weight.
#[derive(Debug, Clone)]
pub struct MomentumTop1 {
    lookback: usize,
    top_weight: f64,
}

impl MomentumTop1 {
    /// About six months of trading days.
    pub const DEFAULT_LOOKBACK: usize = 21 * 6;
    pub const DEFAULT_TOP_WEIGHT: f64 = 0.60;

    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            top_weight: Self::DEFAULT_TOP_WEIGHT,
        }
    }

    pub fn with_top_weight(mut self, top_weight: f64) -> Self {
        self.top_weight = top_weight.clamp(0.0, 1.0);
        self
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }
}

impl Default for MomentumTop1 {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LOOKBACK)
    }
}

impl WeightPolicy for MomentumTop1 {
    fn name(&self) -> &str {
        "Momentum Top-1"
    }

    fn warmup_period(&self) -> usize {
        self.lookback
    }

    fn compute_weights(&self, ctx: &PolicyContext) -> Weights {
        let n = ctx.num_assets();
        let scores: Option<Vec<f64>> = (0..n)
            .map(|a| ctx.trailing_return(a, self.lookback))
            .collect();

        let Some(scores) = scores else {
            debug!("Momentum scores undefined at index {}, using equal weight", ctx.index);
            return Weights::equal(n);
        };

        if n == 1 {
            return Weights::from_vec(vec![1.0]);
        }

        // Strict comparison keeps the earliest asset on ties.
        let mut top = 0;
        for (i, score) in scores.iter().enumerate().skip(1) {
            if *score > scores[top] {
                top = i;
            }
        }

        let rest = (1.0 - self.top_weight) / (n - 1) as f64;
        let weights = (0..n)
            .map(|i| if i == top { self.top_weight } else { rest })
            .collect();
        Weights::from_vec(weights)
    }
}

/// Which asset an inverse-volatility policy caps.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapTarget {
    /// No cap.
    None,
    /// A named asset. If it is not in the basket, nothing is capped.
    Asset(String),
    /// Whichever asset is most volatile on the decision date.
    #[default]
    HighestVolatility,
}

/// Risk parity by inverse volatility, with one asset's weight capped.
#[derive(Debug, Clone)]
pub struct InverseVolatilityCapped {
    lookback: usize,
    cap: f64,
    target: CapTarget,
}

impl InverseVolatilityCapped {
    pub const DEFAULT_LOOKBACK: usize = 60;
    pub const DEFAULT_CAP: f64 = 0.20;

    pub fn new(lookback: usize, cap: f64, target: CapTarget) -> Self {
        Self {
            lookback,
            cap,
            target,
        }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    fn cap_index(&self, basket: &AssetBasket, vols: &[f64]) -> Option<usize> {
        match &self.target {
            CapTarget::None => None,
            CapTarget::Asset(name) => basket.position(name),
            CapTarget::HighestVolatility => {
                let mut top = 0;
                for (i, v) in vols.iter().enumerate().skip(1) {
                    if *v > vols[top] {
                        top = i;
                    }
                }
                Some(top)
            }
        }
    }
}

impl Default for InverseVolatilityCapped {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_LOOKBACK,
            Self::DEFAULT_CAP,
            CapTarget::HighestVolatility,
        )
    }
}

impl WeightPolicy for InverseVolatilityCapped {
    fn name(&self) -> &str {
        "Inverse Volatility (Capped)"
    }

    fn warmup_period(&self) -> usize {
        self.lookback
    }

    fn compute_weights(&self, ctx: &PolicyContext) -> Weights {
        let n = ctx.num_assets();
        let vols: Option<Vec<f64>> = (0..n)
            .map(|a| ctx.trailing_volatility(a, self.lookback))
            .map(|v| v.filter(|v| *v > 0.0))
            .collect();

        let Some(vols) = vols else {
            debug!(
                "Volatility zero or undefined at index {}, using equal weight",
                ctx.index
            );
            return Weights::equal(n);
        };

        let inverse: Vec<f64> = vols.iter().map(|v| 1.0 / v).collect();
        let total: f64 = inverse.iter().sum();
        let weights = Weights::from_vec(inverse.iter().map(|iv| iv / total).collect());

        match self.cap_index(ctx.basket, &vols) {
            Some(index) if n > 1 => cap_and_redistribute(&weights, index, self.cap),
            _ => weights,
        }
    }
}

/// Clamp one coordinate to `ceiling` and hand the excess to the others.
///
/// The excess is split in proportion to the other weights renormalized among
/// themselves, so the total is unchanged and no weight decreases. If every
/// other weight is zero the excess is split evenly. A single-asset vector is
/// returned unchanged.
pub fn cap_and_redistribute(weights: &Weights, index: usize, ceiling: f64) -> Weights {
    let w = weights.as_slice();
    let n = w.len();
    if index >= n || n < 2 || w[index] <= ceiling {
        return weights.clone();
    }

    let excess = w[index] - ceiling;
    let others_total: f64 = w
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, v)| v)
        .sum();

    let capped = w
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            if i == index {
                ceiling
            } else if others_total > 0.0 {
                v + excess * (v / others_total)
            } else {
                v + excess / (n - 1) as f64
            }
        })
        .collect();
    Weights::from_vec(capped)
}
