//! Performance analytics and reporting.

use crate::error::Result;
use crate::simulator::SimulationResult;
use crate::types::EquitySeries;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use tabled::{builder::Builder, settings::Style};
use tracing::info;

/// Trading days used to annualize daily statistics.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Calendar days per year used for elapsed time.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Risk/return statistics of one equity curve.
///
/// Statistics that cannot be computed (no elapsed time, zero volatility,
/// too few observations) are `None`, never zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// Compound annual growth rate.
    pub cagr: Option<f64>,
    /// Annualized standard deviation of daily returns.
    pub volatility: Option<f64>,
    /// Annualized excess return per unit of volatility.
    pub sharpe: Option<f64>,
    /// Worst peak-to-trough decline, always <= 0.
    pub max_drawdown: f64,
    pub final_equity: f64,
    /// Elapsed calendar years between the first and last date.
    pub years: f64,
}

impl PerformanceStats {
    /// Compute statistics for an equity curve that starts at 1.0.
    pub fn from_equity(equity: &EquitySeries, risk_free_rate: f64) -> Self {
        let daily = equity.daily_returns();
        let final_equity = equity.final_equity().unwrap_or(1.0);

        let years = match (equity.first(), equity.last()) {
            (Some(first), Some(last)) => (last.date - first.date).num_days() as f64 / DAYS_PER_YEAR,
            _ => 0.0,
        };

        let cagr = if years > 0.0 {
            finite(final_equity.powf(1.0 / years) - 1.0)
        } else {
            None
        };

        let daily_std = sample_std(&daily);
        let volatility = daily_std.map(|s| s * TRADING_DAYS_PER_YEAR.sqrt());

        let sharpe = match volatility {
            Some(vol) if vol > 0.0 => {
                let mean = daily.iter().sum::<f64>() / daily.len() as f64;
                finite((mean * TRADING_DAYS_PER_YEAR - risk_free_rate) / vol)
            }
            _ => None,
        };

        Self {
            cagr,
            volatility,
            sharpe,
            max_drawdown: max_drawdown(equity),
            final_equity,
            years,
        }
    }

    /// Value of one metric.
    pub fn metric(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Cagr => self.cagr,
            Metric::Volatility => self.volatility,
            Metric::Sharpe => self.sharpe,
            Metric::MaxDrawdown => Some(self.max_drawdown),
        }
    }

    pub fn total_return(&self) -> f64 {
        self.final_equity - 1.0
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

/// Sample (n - 1) standard deviation; `None` with fewer than two values.
fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    finite(variance.sqrt())
}

/// Fractional decline from the running peak at each point (all <= 0).
pub fn drawdown_series(equity: &EquitySeries) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    equity
        .points()
        .iter()
        .map(|p| {
            peak = peak.max(p.equity);
            if peak > 0.0 {
                p.equity / peak - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

/// Minimum of [`drawdown_series`]; zero only for a non-decreasing curve.
/// Non-finite points are ignored.
pub fn max_drawdown(equity: &EquitySeries) -> f64 {
    drawdown_series(equity)
        .into_iter()
        .filter(|dd| dd.is_finite())
        .fold(0.0, f64::min)
}

/// Summary metric a table can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    #[default]
    Cagr,
    Volatility,
    Sharpe,
    MaxDrawdown,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Cagr => "CAGR",
            Metric::Volatility => "Volatility",
            Metric::Sharpe => "Sharpe",
            Metric::MaxDrawdown => "Max Drawdown",
        };
        f.write_str(name)
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "cagr" => Ok(Metric::Cagr),
            "volatility" | "vol" => Ok(Metric::Volatility),
            "sharpe" => Ok(Metric::Sharpe),
            "max-drawdown" | "mdd" | "drawdown" => Ok(Metric::MaxDrawdown),
            other => Err(format!("Unknown metric: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

/// One strategy's line in the summary table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub strategy: String,
    pub stats: PerformanceStats,
}

/// Strategy -> statistics table, sorted by CAGR descending unless re-sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    rows: Vec<SummaryRow>,
}

impl PerformanceSummary {
    pub fn from_results(results: &[SimulationResult], risk_free_rate: f64) -> Self {
        let rows = results
            .iter()
            .map(|r| SummaryRow {
                strategy: r.strategy_name.clone(),
                stats: PerformanceStats::from_equity(&r.equity, risk_free_rate),
            })
            .collect();
        let mut summary = Self { rows };
        summary.sort_by(Metric::default(), SortOrder::default());
        summary
    }

    /// Stable sort on one metric; undefined values always go last.
    pub fn sort_by(&mut self, metric: Metric, order: SortOrder) {
        self.rows.sort_by(|a, b| {
            match (a.stats.metric(metric), b.stats.metric(metric)) {
                (Some(x), Some(y)) => {
                    let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
                    match order {
                        SortOrder::Ascending => ord,
                        SortOrder::Descending => ord.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        });
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.rows
    }

    pub fn get(&self, strategy: &str) -> Option<&PerformanceStats> {
        self.rows
            .iter()
            .find(|r| r.strategy == strategy)
            .map(|r| &r.stats)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Format results for terminal display and export.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print the summary table to stdout.
    pub fn print_summary(summary: &PerformanceSummary, title: &str) {
        println!();
        println!("{}", format!(" {} ", title).bold().blue());
        println!("{}", Self::summary_table(summary));
    }

    /// Render the summary as a rounded text table.
    pub fn summary_table(summary: &PerformanceSummary) -> String {
        let mut builder = Builder::new();
        builder.push_record(["Strategy", "CAGR", "Volatility", "Sharpe", "Max Drawdown"]);

        for row in summary.rows() {
            let s = &row.stats;
            builder.push_record([
                row.strategy.clone(),
                Self::format_signed_pct(s.cagr),
                Self::format_pct(s.volatility),
                Self::format_ratio(s.sharpe),
                Self::format_pct(Some(s.max_drawdown)),
            ]);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    fn format_pct(value: Option<f64>) -> String {
        value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}%", v * 100.0))
    }

    fn format_signed_pct(value: Option<f64>) -> String {
        match value {
            Some(v) if v >= 0.0 => format!("{:.2}%", v * 100.0).green().to_string(),
            Some(v) => format!("{:.2}%", v * 100.0).red().to_string(),
            None => "n/a".to_string(),
        }
    }

    fn format_ratio(value: Option<f64>) -> String {
        value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
    }

    /// Export the summary to JSON; undefined values become `null`.
    pub fn to_json(summary: &PerformanceSummary) -> String {
        serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string())
    }

    /// Column names of the CSV summary.
    pub fn csv_header() -> &'static str {
        "strategy,cagr,volatility,sharpe,max_drawdown"
    }

    /// One summary row as CSV fields; undefined values are empty.
    fn csv_record(row: &SummaryRow) -> [String; 5] {
        let field = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        [
            row.strategy.clone(),
            field(row.stats.cagr),
            field(row.stats.volatility),
            field(row.stats.sharpe),
            row.stats.max_drawdown.to_string(),
        ]
    }

    /// Write the summary as CSV (header plus one quoted-as-needed row per
    /// strategy) to any writer, e.g. stdout.
    pub fn write_summary<W: Write>(summary: &PerformanceSummary, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(Self::csv_header().split(','))?;
        for row in summary.rows() {
            writer.write_record(Self::csv_record(row))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the summary table to a CSV file.
    pub fn write_summary_csv(summary: &PerformanceSummary, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        Self::write_summary(summary, File::create(path)?)?;
        info!("Wrote summary to {}", path.display());
        Ok(())
    }

    /// Write every strategy's equity curve side by side: `date,<strategy>...`.
    ///
    /// All results must come from the same price table.
    pub fn write_equity_csv(results: &[SimulationResult], path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["date".to_string()];
        header.extend(results.iter().map(|r| r.strategy_name.clone()));
        writer.write_record(&header)?;

        let days = results.first().map_or(0, |r| r.equity.len());
        for t in 0..days {
            let mut record = Vec::with_capacity(results.len() + 1);
            record.push(results[0].equity.points()[t].date.to_string());
            for result in results {
                let value = result.equity.points().get(t).map(|p| p.equity);
                record.push(value.map(|v| v.to_string()).unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        info!("Wrote {} equity rows to {}", days, path.display());
        Ok(())
    }
}
