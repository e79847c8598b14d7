//! Equity-curve simulation.
//!
//! Each strategy walks the calendar once. On an eligible rebalance date the
//! policy picks new weights and the fee model charges for the turnover;
//! otherwise the previous weights carry forward unchanged (no drift).
//!
//! New weights earn the same day's return: a rebalance decided on date `t`
//! is assumed to trade at `t`'s close *and* collect `t`'s return. This is a
//! look-ahead simplification, not a tradable convention.

use crate::data::PriceTable;
use crate::error::{BacktestError, Result};
use crate::fees::{apply_fee, FeeOutcome};
use crate::policy::{PolicyContext, WeightPolicy};
use crate::schedule::{schedule_with_rule, Cadence, MonthEndRule};
use crate::types::{EquitySeries, Weights};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A named policy with its rebalance cadence and fee rate.
pub struct StrategySpec {
    pub name: String,
    pub policy: Box<dyn WeightPolicy>,
    pub cadence: Cadence,
    /// Cost per unit of turnover (0.001 = 10 bps).
    pub fee_rate: f64,
}

impl StrategySpec {
    pub fn new(
        name: impl Into<String>,
        policy: impl WeightPolicy + 'static,
        cadence: Cadence,
        fee_rate: f64,
    ) -> Self {
        Self {
            name: name.into(),
            policy: Box::new(policy),
            cadence,
            fee_rate,
        }
    }
}

impl std::fmt::Debug for StrategySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategySpec")
            .field("name", &self.name)
            .field("policy", &self.policy.name())
            .field("cadence", &self.cadence)
            .field("fee_rate", &self.fee_rate)
            .finish()
    }
}

/// Simulator settings shared by every strategy in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub month_end_rule: MonthEndRule,
    /// Refuse calendars longer than this many rows.
    pub max_days: Option<usize>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            month_end_rule: MonthEndRule::default(),
            max_days: Some(DEFAULT_MAX_DAYS),
        }
    }
}

/// Roughly eight centuries of business days.
pub const DEFAULT_MAX_DAYS: usize = 200_000;

/// Reject a policy target that does not cover the basket or is not a
/// long-only vector summing to one.
fn check_weights(strategy: &str, date: NaiveDate, target: &Weights, assets: usize) -> Result<()> {
    if target.len() != assets {
        warn!("{}: {} weights for {} assets on {}", strategy, target.len(), assets, date);
        return Err(BacktestError::InvalidInput(format!(
            "{}: policy returned {} weights for {} assets on {}",
            strategy,
            target.len(),
            assets,
            date
        )));
    }
    if !target.is_normalized() {
        warn!("{}: weights on {} sum to {}", strategy, date, target.sum());
        return Err(BacktestError::InvalidInput(format!(
            "{}: policy weights on {} are not non-negative and summing to 1 (sum {})",
            strategy,
            date,
            target.sum()
        )));
    }
    Ok(())
}

/// Weights adopted on one rebalance date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    /// Calendar position of `date`.
    pub index: usize,
    pub weights: Weights,
    pub turnover: f64,
    pub cost_factor: f64,
}

/// Output of one strategy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub strategy_name: String,
    pub equity: EquitySeries,
    pub rebalances: Vec<RebalanceEvent>,
}

impl SimulationResult {
    pub fn final_equity(&self) -> Option<f64> {
        self.equity.final_equity()
    }

    pub fn total_turnover(&self) -> f64 {
        self.rebalances.iter().map(|e| e.turnover).sum()
    }
}

/// Drives strategies over an immutable price/return feed.
#[derive(Debug, Clone)]
pub struct Simulator<'a> {
    table: &'a PriceTable,
    config: SimulatorConfig,
}

impl<'a> Simulator<'a> {
    pub fn new(table: &'a PriceTable) -> Self {
        Self::with_config(table, SimulatorConfig::default())
    }

    pub fn with_config(table: &'a PriceTable, config: SimulatorConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &PriceTable {
        self.table
    }

    /// Simulate one strategy. Pure: identical inputs give identical output.
    pub fn run(&self, strategy: &StrategySpec) -> Result<SimulationResult> {
        let days = self.table.len();
        if let Some(limit) = self.config.max_days {
            if days > limit {
                return Err(BacktestError::CalendarTooLong { days, limit });
            }
        }

        let dates = self.table.dates();
        let returns = self.table.returns();
        let schedule = schedule_with_rule(dates, strategy.cadence, self.config.month_end_rule);
        let warmup = strategy.policy.warmup_period();

        debug!(
            "{}: {} {} rebalance dates, warmup {}",
            strategy.name,
            schedule.len(),
            strategy.cadence,
            warmup
        );

        let mut weights = Weights::equal(self.table.basket().len());
        let mut equity = EquitySeries::with_capacity(days);
        let mut rebalances = Vec::with_capacity(schedule.len());
        let mut value = 1.0;
        equity.push(dates[0], value);

        for t in 1..days {
            let fee = if schedule.contains(t) && t >= warmup {
                let ctx = PolicyContext::new(self.table, t);
                let target = strategy.policy.compute_weights(&ctx);
                check_weights(&strategy.name, dates[t], &target, self.table.basket().len())?;
                let fee = apply_fee(&weights, &target, strategy.fee_rate);
                rebalances.push(RebalanceEvent {
                    date: dates[t],
                    index: t,
                    weights: target.clone(),
                    turnover: fee.turnover,
                    cost_factor: fee.cost_factor,
                });
                weights = target;
                fee
            } else {
                FeeOutcome::NO_TRADE
            };

            let portfolio_return = weights.dot(&returns[t]);
            value = value * (1.0 + portfolio_return) * fee.cost_factor;
            equity.push(dates[t], value);
        }

        info!(
            "{}: {} rebalances, final equity {:.4}",
            strategy.name,
            rebalances.len(),
            value
        );

        Ok(SimulationResult {
            strategy_name: strategy.name.clone(),
            equity,
            rebalances,
        })
    }

    /// Simulate strategies one after another, in order.
    pub fn run_all(&self, strategies: &[StrategySpec]) -> Result<Vec<SimulationResult>> {
        strategies.iter().map(|s| self.run(s)).collect()
    }

    /// Simulate strategies on the rayon pool. Results keep the input order.
    pub fn run_all_parallel(&self, strategies: &[StrategySpec]) -> Result<Vec<SimulationResult>> {
        strategies.par_iter().map(|s| self.run(s)).collect()
    }
}
