//! Core data types for the backtester.

use crate::error::{BacktestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Ordered, fixed set of asset identifiers.
///
/// The basket order is the column order of the price table and the
/// coordinate order of every [`Weights`] vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetBasket {
    assets: Vec<String>,
}

impl AssetBasket {
    /// Create a basket, rejecting empty or duplicated identifiers.
    pub fn new<I, S>(assets: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let assets: Vec<String> = assets.into_iter().map(Into::into).collect();
        if assets.is_empty() {
            return Err(BacktestError::EmptyBasket);
        }

        let mut seen = HashSet::with_capacity(assets.len());
        for asset in &assets {
            if !seen.insert(asset.as_str()) {
                return Err(BacktestError::DuplicateAsset(asset.clone()));
            }
        }

        Ok(Self { assets })
    }

    /// Number of assets (always at least one).
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Asset identifiers in basket order.
    pub fn names(&self) -> &[String] {
        &self.assets
    }

    /// Position of an asset in the basket.
    pub fn position(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.assets.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(String::as_str)
    }
}

impl fmt::Display for AssetBasket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.assets.join(", "))
    }
}

/// Target portfolio weights in basket order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights(Vec<f64>);

impl Weights {
    /// Tolerance used when checking that weights sum to one.
    pub const SUM_TOLERANCE: f64 = 1e-9;

    /// 1/N for each of `n` assets.
    pub fn equal(n: usize) -> Self {
        if n == 0 {
            return Self(Vec::new());
        }
        Self(vec![1.0 / n as f64; n])
    }

    pub fn from_vec(weights: Vec<f64>) -> Self {
        Self(weights)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    /// True when every weight is non-negative and the total is one.
    pub fn is_normalized(&self) -> bool {
        self.0.iter().all(|w| *w >= 0.0) && (self.sum() - 1.0).abs() <= Self::SUM_TOLERANCE
    }

    /// Weighted sum of a per-asset row (e.g. one day of returns).
    pub fn dot(&self, row: &[f64]) -> f64 {
        self.0.iter().zip(row).map(|(w, r)| w * r).sum()
    }

    /// Label each weight with its asset name.
    pub fn to_map(&self, basket: &AssetBasket) -> BTreeMap<String, f64> {
        basket
            .names()
            .iter()
            .cloned()
            .zip(self.0.iter().copied())
            .collect()
    }
}

/// Point on an equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    /// Cumulative growth factor (1.0 on the first date).
    pub equity: f64,
}

/// Cumulative equity curve of one strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquitySeries {
    points: Vec<EquityPoint>,
}

impl EquitySeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, date: NaiveDate, equity: f64) {
        self.points.push(EquityPoint { date, equity });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn first(&self) -> Option<&EquityPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }

    /// Equity on the last date.
    pub fn final_equity(&self) -> Option<f64> {
        self.points.last().map(|p| p.equity)
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.equity).collect()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.points.iter().map(|p| p.date).collect()
    }

    /// Day-over-day percentage change; the undefined first entry is dropped.
    pub fn daily_returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| w[1].equity / w[0].equity - 1.0)
            .collect()
    }
}

impl FromIterator<EquityPoint> for EquitySeries {
    fn from_iter<T: IntoIterator<Item = EquityPoint>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}
