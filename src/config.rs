//! Configuration file support for backtests.
//!
//! Allows loading the price source, simulator settings and strategy roster
//! from TOML files for reproducibility.

use crate::data::{
    align_series, load_close_series, load_wide_csv, reindex_business_days, AlignMode, DataConfig,
    PriceTable,
};
use crate::error::{BacktestError, Result};
use crate::policy::{CapTarget, EqualWeight, InverseVolatilityCapped, MomentumTop1};
use crate::schedule::{Cadence, MonthEndRule};
use crate::simulator::{SimulatorConfig, StrategySpec, DEFAULT_MAX_DAYS};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete backtest configuration loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    /// General backtest settings.
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Data settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Strategy roster.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategySettings>,
}

impl Default for BacktestFileConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestSettings::default(),
            data: DataSettings::default(),
            strategies: default_strategies(),
        }
    }
}

/// General backtest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    /// Annual risk-free rate used for Sharpe ratios.
    #[serde(default)]
    pub risk_free_rate: f64,
    /// Default fee per unit of turnover.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: f64,
    /// Start date (YYYY-MM-DD format).
    #[serde(default)]
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD format).
    #[serde(default)]
    pub end_date: Option<String>,
    /// Month-end convention for rebalance dates.
    #[serde(default)]
    pub month_end_rule: MonthEndRule,
    /// Longest calendar the simulator accepts; 0 means no limit.
    #[serde(default = "default_max_days")]
    pub max_days: Option<usize>,
    /// Simulate strategies in parallel.
    #[serde(default)]
    pub parallel: bool,
}

fn default_fee_rate() -> f64 { 0.001 }
fn default_max_days() -> Option<usize> { Some(DEFAULT_MAX_DAYS) }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            fee_rate: 0.001,
            start_date: None,
            end_date: None,
            month_end_rule: MonthEndRule::default(),
            max_days: Some(DEFAULT_MAX_DAYS),
            parallel: false,
        }
    }
}

/// One asset loaded from its own CSV file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSource {
    pub name: String,
    pub path: String,
}

/// How loaded prices are aligned onto one calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlignSetting {
    /// Monday-to-Friday calendar with forward fill.
    #[default]
    BusinessDays,
    /// Dates common to every asset only.
    Inner,
}

/// Data settings.
///
/// Prices come either from one wide CSV (`path`) or one CSV per asset
/// (`assets`, in basket order).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataSettings {
    /// Path to a wide price table: date column then one column per asset.
    pub path: Option<String>,
    /// Per-asset price files.
    #[serde(default)]
    pub assets: Vec<AssetSource>,
    /// Date format in CSV.
    pub date_format: Option<String>,
    /// CSV delimiter.
    pub delimiter: Option<char>,
    /// Calendar alignment.
    #[serde(default)]
    pub align: AlignSetting,
}

impl DataSettings {
    fn data_config(&self) -> Result<DataConfig> {
        let delimiter = match self.delimiter {
            Some(c) if !c.is_ascii() => {
                return Err(BacktestError::ConfigError(format!(
                    "data.delimiter must be a single ASCII character, got {:?}",
                    c
                )));
            }
            other => other.map(|c| c as u8),
        };
        Ok(DataConfig {
            date_format: self.date_format.clone(),
            delimiter,
            ..Default::default()
        })
    }

    /// Load and align the configured prices.
    pub fn load(&self) -> Result<PriceTable> {
        let config = self.data_config()?;
        match (&self.path, self.assets.is_empty()) {
            (Some(path), true) => {
                let table = load_wide_csv(path, &config)?;
                match self.align {
                    AlignSetting::BusinessDays => reindex_business_days(&table),
                    AlignSetting::Inner => Ok(table),
                }
            }
            (None, false) => {
                let mut series = Vec::with_capacity(self.assets.len());
                for asset in &self.assets {
                    series.push((asset.name.as_str(), load_close_series(&asset.path, &config)?));
                }
                let mode = match self.align {
                    AlignSetting::BusinessDays => AlignMode::BusinessDayForwardFill,
                    AlignSetting::Inner => AlignMode::Inner,
                };
                align_series(&series, mode)
            }
            (Some(_), false) => Err(BacktestError::ConfigError(
                "Specify either data.path or data.assets, not both".to_string(),
            )),
            (None, true) => Err(BacktestError::ConfigError(
                "No data path specified in config".to_string(),
            )),
        }
    }
}

/// One strategy in the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    /// Label used in reports.
    pub name: String,
    /// Policy: "equal-weight", "momentum" or "inverse-volatility".
    pub kind: String,
    /// "monthly" or "quarterly".
    #[serde(default = "default_cadence")]
    pub cadence: String,
    /// Overrides the backtest-wide fee rate.
    pub fee_rate: Option<f64>,
    /// Lookback window in trading days.
    pub lookback: Option<usize>,
    /// Weight of the momentum leader.
    pub top_weight: Option<f64>,
    /// Weight ceiling for the capped asset.
    pub cap: Option<f64>,
    /// Asset to cap; the most volatile asset when omitted.
    pub cap_asset: Option<String>,
}

fn default_cadence() -> String { "monthly".to_string() }

impl StrategySettings {
    fn base(name: &str, kind: &str, cadence: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            cadence: cadence.to_string(),
            fee_rate: None,
            lookback: None,
            top_weight: None,
            cap: None,
            cap_asset: None,
        }
    }

    /// Build the runnable strategy, validating parameters.
    pub fn build(&self, default_fee_rate: f64) -> Result<StrategySpec> {
        let cadence: Cadence = self
            .cadence
            .parse()
            .map_err(|e: String| BacktestError::ConfigError(format!("{}: {}", self.name, e)))?;

        let fee_rate = self.fee_rate.unwrap_or(default_fee_rate);
        if fee_rate.is_nan() || fee_rate < 0.0 {
            return Err(self.invalid(format!("fee_rate must be >= 0, got {}", fee_rate)));
        }

        let spec = match self.kind.to_lowercase().as_str() {
            "equal-weight" | "equal_weight" | "ew" => {
                StrategySpec::new(&self.name, EqualWeight, cadence, fee_rate)
            }
            "momentum" | "momentum-top1" | "momentum_top1" => {
                let lookback = self.lookback.unwrap_or(MomentumTop1::DEFAULT_LOOKBACK);
                if lookback == 0 {
                    return Err(self.invalid("lookback must be at least 1".to_string()));
                }
                let top_weight = self.top_weight.unwrap_or(MomentumTop1::DEFAULT_TOP_WEIGHT);
                if !(0.0..=1.0).contains(&top_weight) {
                    return Err(self.invalid(format!("top_weight must be in [0, 1], got {}", top_weight)));
                }
                let policy = MomentumTop1::new(lookback).with_top_weight(top_weight);
                StrategySpec::new(&self.name, policy, cadence, fee_rate)
            }
            "inverse-volatility" | "inverse_volatility" | "risk-parity" | "risk_parity" => {
                let lookback = self.lookback.unwrap_or(InverseVolatilityCapped::DEFAULT_LOOKBACK);
                if lookback < 2 {
                    return Err(self.invalid("lookback must be at least 2".to_string()));
                }
                let cap = self.cap.unwrap_or(InverseVolatilityCapped::DEFAULT_CAP);
                if !(cap > 0.0 && cap <= 1.0) {
                    return Err(self.invalid(format!("cap must be in (0, 1], got {}", cap)));
                }
                let target = match &self.cap_asset {
                    Some(asset) => CapTarget::Asset(asset.clone()),
                    None => CapTarget::HighestVolatility,
                };
                let policy = InverseVolatilityCapped::new(lookback, cap, target);
                StrategySpec::new(&self.name, policy, cadence, fee_rate)
            }
            other => {
                return Err(BacktestError::ConfigError(format!(
                    "Unknown strategy kind: {}",
                    other
                )));
            }
        };
        Ok(spec)
    }

    fn invalid(&self, message: String) -> BacktestError {
        BacktestError::ConfigError(format!("{}: {}", self.name, message))
    }
}

/// The three-strategy roster: quarterly equal weight, six-month momentum,
/// and capped inverse volatility.
fn default_strategies() -> Vec<StrategySettings> {
    vec![
        StrategySettings::base("A_EqualWeight_Q", "equal-weight", "quarterly"),
        StrategySettings {
            lookback: Some(MomentumTop1::DEFAULT_LOOKBACK),
            top_weight: Some(MomentumTop1::DEFAULT_TOP_WEIGHT),
            ..StrategySettings::base("B_Momentum6M", "momentum", "monthly")
        },
        StrategySettings {
            lookback: Some(InverseVolatilityCapped::DEFAULT_LOOKBACK),
            cap: Some(InverseVolatilityCapped::DEFAULT_CAP),
            ..StrategySettings::base("C_RiskParity", "inverse-volatility", "monthly")
        },
    ]
}

fn parse_config_date(value: &Option<String>) -> Result<Option<NaiveDate>> {
    value
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .map_err(BacktestError::from)
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BacktestError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Simulator settings.
    pub fn to_simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            month_end_rule: self.backtest.month_end_rule,
            max_days: self.backtest.max_days.filter(|&limit| limit > 0),
        }
    }

    /// Build every configured strategy.
    pub fn build_strategies(&self) -> Result<Vec<StrategySpec>> {
        if self.strategies.is_empty() {
            return Err(BacktestError::ConfigError(
                "No strategies configured".to_string(),
            ));
        }
        self.strategies
            .iter()
            .map(|s| s.build(self.backtest.fee_rate))
            .collect()
    }

    /// Optional `(start, end)` date filter.
    pub fn date_range(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>)> {
        Ok((
            parse_config_date(&self.backtest.start_date)?,
            parse_config_date(&self.backtest.end_date)?,
        ))
    }

    /// Load prices and apply the date filter.
    pub fn load_prices(&self) -> Result<PriceTable> {
        let table = self.data.load()?;
        match self.date_range()? {
            (None, None) => Ok(table),
            (start, end) => table.between(start, end),
        }
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# rebal backtest configuration

[backtest]
risk_free_rate = 0.0
fee_rate = 0.001          # 0.10% per unit of turnover
# start_date = "2015-01-01"
# end_date = "2024-12-31"
month_end_rule = "last-trading-day"   # or "calendar-month-end"
max_days = 200000         # 0 disables the calendar length limit
parallel = false

[data]
path = "data/prices.csv"  # date,GLD,SPY,BTC-USD
align = "business-days"   # or "inner"
# Alternatively, one file per asset (basket order follows this list):
# [[data.assets]]
# name = "GLD"
# path = "data/GLD.csv"

[[strategies]]
name = "A_EqualWeight_Q"
kind = "equal-weight"
cadence = "quarterly"

[[strategies]]
name = "B_Momentum6M"
kind = "momentum"
cadence = "monthly"
lookback = 126
top_weight = 0.6

[[strategies]]
name = "C_RiskParity"
kind = "inverse-volatility"
cadence = "monthly"
lookback = 60
cap = 0.2
# cap_asset = "BTC-USD"   # default: the most volatile asset
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = BacktestFileConfig::default();
        assert_eq!(config.backtest.fee_rate, 0.001);
        assert_eq!(config.backtest.risk_free_rate, 0.0);
        let names: Vec<&str> = config.strategies.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A_EqualWeight_Q", "B_Momentum6M", "C_RiskParity"]);
    }

    #[test]
    fn test_default_roster_builds() {
        let specs = BacktestFileConfig::default().build_strategies().unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].cadence, Cadence::Quarterly);
        assert_eq!(specs[1].policy.warmup_period(), 126);
        assert_eq!(specs[2].policy.warmup_period(), 60);
        assert!(specs.iter().all(|s| s.fee_rate == 0.001));
    }

    #[test]
    fn test_load_config() {
        let toml_content = r#"
[backtest]
risk_free_rate = 0.02
fee_rate = 0.002
start_date = "2020-01-01"
month_end_rule = "calendar-month-end"

[data]
path = "prices.csv"
align = "inner"

[[strategies]]
name = "mom"
kind = "momentum"
lookback = 63
fee_rate = 0.0

[[strategies]]
name = "rp"
kind = "risk-parity"
cadence = "quarterly"
cap = 0.3
cap_asset = "BTC-USD"
"#;
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{}", toml_content).unwrap();

        let config = BacktestFileConfig::load(file.path()).unwrap();
        assert_eq!(config.backtest.risk_free_rate, 0.02);
        assert_eq!(config.backtest.month_end_rule, MonthEndRule::CalendarMonthEnd);
        assert_eq!(config.data.align, AlignSetting::Inner);
        assert_eq!(config.strategies.len(), 2);
        assert_eq!(config.strategies[0].cadence, "monthly");

        let specs = config.build_strategies().unwrap();
        assert_eq!(specs[0].fee_rate, 0.0);
        assert_eq!(specs[0].policy.warmup_period(), 63);
        assert_eq!(specs[1].fee_rate, 0.002);
        assert_eq!(specs[1].cadence, Cadence::Quarterly);

        let (start, end) = config.date_range().unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(end, None);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let settings = StrategySettings::base("x", "martingale", "monthly");
        assert!(matches!(settings.build(0.001), Err(BacktestError::ConfigError(_))));
    }

    #[test]
    fn test_bad_parameters_rejected() {
        let bad_cadence = StrategySettings::base("x", "equal-weight", "weekly");
        assert!(bad_cadence.build(0.001).is_err());

        let bad_cap = StrategySettings {
            cap: Some(0.0),
            ..StrategySettings::base("x", "inverse-volatility", "monthly")
        };
        assert!(bad_cap.build(0.001).is_err());

        let bad_fee = StrategySettings::base("x", "equal-weight", "monthly");
        assert!(bad_fee.build(-0.01).is_err());
    }

    #[test]
    fn test_data_source_required() {
        let config = BacktestFileConfig::default();
        assert!(matches!(config.load_prices(), Err(BacktestError::ConfigError(_))));
    }

    #[test]
    fn test_load_prices_from_per_asset_files() {
        let mut a = NamedTempFile::new().unwrap();
        writeln!(a, "Date,Close").unwrap();
        for (d, p) in [("2024-01-04", 10.0), ("2024-01-05", 11.0), ("2024-01-08", 12.0)] {
            writeln!(a, "{},{}", d, p).unwrap();
        }
        let mut b = NamedTempFile::new().unwrap();
        writeln!(b, "date,close").unwrap();
        for (d, p) in [("2024-01-04", 5.0), ("2024-01-08", 6.0)] {
            writeln!(b, "{},{}", d, p).unwrap();
        }

        let config = BacktestFileConfig {
            data: DataSettings {
                assets: vec![
                    AssetSource {
                        name: "A".into(),
                        path: a.path().display().to_string(),
                    },
                    AssetSource {
                        name: "B".into(),
                        path: b.path().display().to_string(),
                    },
                ],
                ..Default::default()
            },
            ..Default::default()
        };

        let table = config.load_prices().unwrap();
        assert_eq!(table.basket().names(), &["A", "B"]);
        // B has no print on the 5th, so that row is filled from the 4th.
        assert_eq!(table.len(), 3);
        assert_eq!(table.prices()[1], vec![10.0, 5.0]);
    }

    #[test]
    fn test_zero_max_days_disables_limit() {
        let config: BacktestFileConfig = toml::from_str("[backtest]\nmax_days = 0\n").unwrap();
        assert_eq!(config.to_simulator_config().max_days, None);

        let config: BacktestFileConfig = toml::from_str("[backtest]\nmax_days = 500\n").unwrap();
        assert_eq!(config.to_simulator_config().max_days, Some(500));

        let config = BacktestFileConfig::default();
        assert_eq!(config.to_simulator_config().max_days, Some(DEFAULT_MAX_DAYS));
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date§A").unwrap();
        writeln!(file, "2024-01-02§1.0").unwrap();

        let config = BacktestFileConfig {
            data: DataSettings {
                path: Some(file.path().display().to_string()),
                delimiter: Some('§'),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(config.load_prices(), Err(BacktestError::ConfigError(_))));
    }

    #[test]
    fn test_ascii_delimiter_accepted() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "date;A;B").unwrap();
        writeln!(file, "2024-01-02;1.0;2.0").unwrap();
        writeln!(file, "2024-01-03;1.5;2.5").unwrap();

        let config = BacktestFileConfig {
            data: DataSettings {
                path: Some(file.path().display().to_string()),
                delimiter: Some(';'),
                align: AlignSetting::Inner,
                ..Default::default()
            },
            ..Default::default()
        };
        let table = config.load_prices().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.prices()[1], vec![1.5, 2.5]);
    }

    #[test]
    fn test_save_config() {
        let config = BacktestFileConfig::default();
        let file = NamedTempFile::new().unwrap();
        config.save(file.path()).unwrap();

        let loaded = BacktestFileConfig::load(file.path()).unwrap();
        assert_eq!(loaded.strategies.len(), config.strategies.len());
        assert_eq!(loaded.backtest.fee_rate, config.backtest.fee_rate);
    }

    #[test]
    fn test_example_config_parses() {
        let config: BacktestFileConfig = toml::from_str(&BacktestFileConfig::example()).unwrap();
        assert_eq!(config.strategies.len(), 3);
        assert!(config.build_strategies().is_ok());
        assert_eq!(config.data.path.as_deref(), Some("data/prices.csv"));
    }
}
