//! Rebal - a multi-strategy portfolio rebalancing backtester.
//!
//! # Overview
//!
//! Rebal simulates daily equity curves for a set of long-only allocation
//! strategies over an aligned price history of a small asset basket:
//!
//! - **Rebalance scheduling**: monthly or quarterly month-end dates taken from the price calendar
//! - **Weight policies**: equal weight, top-1 momentum, capped inverse volatility
//! - **Fee model**: proportional cost on turnover, charged on rebalance days
//! - **Analytics**: CAGR, annualized volatility, Sharpe, maximum drawdown
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use rebal::{
//!     data::{load_wide_csv, reindex_business_days, DataConfig},
//!     policy::{EqualWeight, MomentumTop1},
//!     schedule::Cadence,
//!     simulator::{Simulator, StrategySpec},
//!     analytics::{PerformanceSummary, ResultFormatter},
//! };
//!
//! let raw = load_wide_csv("data/prices.csv", &DataConfig::default()).unwrap();
//! let table = reindex_business_days(&raw).unwrap();
//!
//! let strategies = vec![
//!     StrategySpec::new("EW", EqualWeight, Cadence::Quarterly, 0.001),
//!     StrategySpec::new("MOM", MomentumTop1::new(126), Cadence::Monthly, 0.001),
//! ];
//!
//! let results = Simulator::new(&table).run_all(&strategies).unwrap();
//! let summary = PerformanceSummary::from_results(&results, 0.0);
//! ResultFormatter::print_summary(&summary, "Summary");
//! ```
//!
//! # Custom Policies
//!
//! Implement the `WeightPolicy` trait to add an allocation rule:
//!
//! ```
//! use rebal::policy::{PolicyContext, WeightPolicy};
//! use rebal::types::Weights;
//!
//! struct AllInFirst;
//!
//! impl WeightPolicy for AllInFirst {
//!     fn name(&self) -> &str {
//!         "All In First"
//!     }
//!
//!     fn compute_weights(&self, ctx: &PolicyContext) -> Weights {
//!         let mut w = vec![0.0; ctx.num_assets()];
//!         w[0] = 1.0;
//!         Weights::from_vec(w)
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: Core data types (AssetBasket, Weights, EquitySeries)
//! - [`data`]: Price loading and calendar alignment
//! - [`schedule`]: Month-end rebalance scheduling
//! - [`policy`]: WeightPolicy trait and built-in policies
//! - [`fees`]: Turnover and fee model
//! - [`simulator`]: Equity-curve simulation
//! - [`analytics`]: Performance metrics and reporting
//! - [`config`]: TOML configuration file support

pub mod analytics;
pub mod config;
pub mod data;
pub mod error;
pub mod fees;
pub mod policy;
pub mod schedule;
pub mod simulator;
pub mod types;

// Re-exports for convenience
pub use analytics::{
    drawdown_series, max_drawdown, Metric, PerformanceStats, PerformanceSummary, ResultFormatter,
    SortOrder, SummaryRow,
};
pub use config::BacktestFileConfig;
pub use data::{align_series, load_close_series, load_wide_csv, AlignMode, DataConfig, PriceTable};
pub use error::{BacktestError, Result};
pub use fees::{apply_fee, turnover, FeeOutcome};
pub use policy::{
    cap_and_redistribute, CapTarget, EqualWeight, InverseVolatilityCapped, MomentumTop1,
    PolicyContext, WeightPolicy,
};
pub use schedule::{schedule, schedule_with_rule, Cadence, MonthEndRule, RebalanceSchedule};
pub use simulator::{RebalanceEvent, SimulationResult, Simulator, SimulatorConfig, StrategySpec};
pub use types::{AssetBasket, EquityPoint, EquitySeries, Weights};
