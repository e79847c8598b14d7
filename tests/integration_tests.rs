//! Integration tests for the rebalancing backtester.

use chrono::NaiveDate;
use rebal::analytics::{max_drawdown, Metric, PerformanceSummary, ResultFormatter, SortOrder};
use rebal::config::{BacktestFileConfig, DataSettings};
use rebal::data::{business_days, load_wide_csv, DataConfig, PriceTable};
use rebal::error::BacktestError;
use rebal::policy::{
    CapTarget, EqualWeight, InverseVolatilityCapped, MomentumTop1, PolicyContext, WeightPolicy,
};
use rebal::schedule::{Cadence, MonthEndRule};
use rebal::simulator::{Simulator, SimulatorConfig, StrategySpec};
use rebal::types::{AssetBasket, Weights};
use std::io::Write;
use tempfile::NamedTempFile;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Always targets the same weights.
struct FixedWeights(Vec<f64>);

impl WeightPolicy for FixedWeights {
    fn name(&self) -> &str {
        "Fixed"
    }

    fn compute_weights(&self, _ctx: &PolicyContext) -> Weights {
        Weights::from_vec(self.0.clone())
    }
}

fn table(names: &[&str], dates: Vec<NaiveDate>, prices: Vec<Vec<f64>>) -> PriceTable {
    PriceTable::new(AssetBasket::new(names.iter().copied()).unwrap(), dates, prices).unwrap()
}

/// Three business-day series with different drift and noise levels.
fn create_synthetic_table(start: NaiveDate, end: NaiveDate) -> PriceTable {
    let dates = business_days(start, end);
    let mut gold = 100.0;
    let mut stocks = 100.0;
    let mut coin = 100.0;
    let prices = (0..dates.len())
        .map(|i| {
            let x = i as f64;
            if i > 0 {
                gold *= 1.0 + 0.0002 + 0.004 * (x * 0.9).sin();
                stocks *= 1.0 + 0.0004 + 0.010 * (x * 1.7).cos();
                coin *= 1.0 + 0.0010 + 0.040 * (x * 0.6).sin();
            }
            vec![gold, stocks, coin]
        })
        .collect();
    table(&["GLD", "SPY", "BTC-USD"], dates, prices)
}

#[test]
fn test_hand_computed_two_asset_run() {
    // Thu 2024-01-25 .. Wed 2024-02-07: January ends at index 4, and the
    // final row (index 9) closes the partial February.
    let dates = business_days(d(2024, 1, 25), d(2024, 2, 7));
    assert_eq!(dates.len(), 10);

    let a = [100.0, 110.0, 110.0, 110.0, 121.0, 121.0, 121.0, 121.0, 121.0, 133.1];
    let b = [100.0, 100.0, 100.0, 100.0, 80.0, 80.0, 80.0, 80.0, 80.0, 80.0];
    let prices = a.iter().zip(&b).map(|(x, y)| vec![*x, *y]).collect();
    let table = table(&["A", "B"], dates, prices);

    // Quarterly keeps only the first month-end, 2024-01-31.
    let spec = StrategySpec::new("fixed", FixedWeights(vec![0.25, 0.75]), Cadence::Quarterly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();

    assert_eq!(result.rebalances.len(), 1);
    let event = &result.rebalances[0];
    assert_eq!(event.date, d(2024, 1, 31));
    assert_eq!(event.index, 4);
    assert!((event.turnover - 0.5).abs() < 1e-12);
    assert!((event.cost_factor - 0.9995).abs() < 1e-12);

    let values = result.equity.values();
    assert_eq!(values[0], 1.0);
    // Day 1: equal weight earns half of A's 10%.
    assert!((values[1] - 1.05).abs() < 1e-9);
    // Day 4: new weights earn 0.25 * 10% + 0.75 * -20%, less the fee.
    assert!((values[4] - 0.918290625).abs() < 1e-9);
    assert!((values[8] - 0.918290625).abs() < 1e-9);
    assert!((result.final_equity().unwrap() - 0.941247890625).abs() < 1e-9);

    assert!((max_drawdown(&result.equity) - (-0.1254375)).abs() < 1e-9);
}

#[test]
fn test_monthly_includes_final_partial_month() {
    let dates = business_days(d(2024, 1, 25), d(2024, 2, 7));
    let prices = vec![vec![100.0, 100.0]; dates.len()];
    let table = table(&["A", "B"], dates, prices);

    let spec = StrategySpec::new("fixed", FixedWeights(vec![0.25, 0.75]), Cadence::Monthly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();
    let dates: Vec<NaiveDate> = result.rebalances.iter().map(|e| e.date).collect();
    assert_eq!(dates, vec![d(2024, 1, 31), d(2024, 2, 7)]);
    // Second rebalance targets the weights already held.
    assert_eq!(result.rebalances[1].turnover, 0.0);
    assert_eq!(result.rebalances[1].cost_factor, 1.0);
}

#[test]
fn test_calendar_month_end_rule_skips_untraded_labels() {
    // 2024-03-31 is a Sunday: the calendar rule drops March entirely.
    let dates = business_days(d(2024, 1, 2), d(2024, 4, 30));
    let prices = vec![vec![100.0, 100.0]; dates.len()];
    let table = table(&["A", "B"], dates, prices);

    let config = SimulatorConfig {
        month_end_rule: MonthEndRule::CalendarMonthEnd,
        ..Default::default()
    };
    let spec = StrategySpec::new("ew", EqualWeight, Cadence::Monthly, 0.001);
    let result = Simulator::with_config(&table, config).run(&spec).unwrap();
    let dates: Vec<NaiveDate> = result.rebalances.iter().map(|e| e.date).collect();
    assert_eq!(dates, vec![d(2024, 1, 31), d(2024, 2, 29), d(2024, 4, 30)]);
}

#[test]
fn test_flat_prices_equity_is_product_of_cost_factors() {
    let dates = business_days(d(2023, 1, 2), d(2023, 12, 29));
    let prices = vec![vec![50.0, 20.0, 300.0]; dates.len()];
    let table = table(&["X", "Y", "Z"], dates, prices);

    let spec = StrategySpec::new("mom", MomentumTop1::new(21), Cadence::Monthly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();

    let product: f64 = result.rebalances.iter().map(|e| e.cost_factor).product();
    assert!((result.final_equity().unwrap() - product).abs() < 1e-12);
    // Flat scores tie, so the first asset leads from the first rebalance on.
    assert!(product < 1.0);
    assert!(result.rebalances[1..].iter().all(|e| e.turnover == 0.0));
}

#[test]
fn test_flat_prices_default_roster_pays_only_fees() {
    let dates = business_days(d(2022, 1, 3), d(2023, 12, 29));
    let prices = vec![vec![1800.0, 400.0, 30000.0]; dates.len()];
    let table = table(&["GLD", "SPY", "BTC-USD"], dates, prices);

    let specs = BacktestFileConfig::default().build_strategies().unwrap();
    let results = Simulator::new(&table).run_all(&specs).unwrap();
    assert_eq!(results.len(), 3);

    for result in &results {
        assert!(!result.rebalances.is_empty(), "{}", result.strategy_name);
        let product: f64 = result.rebalances.iter().map(|e| e.cost_factor).product();
        let final_equity = result.final_equity().unwrap();
        assert!(
            (final_equity - product).abs() < 1e-12,
            "{}: {} vs {}",
            result.strategy_name,
            final_equity,
            product
        );
        assert!(result.equity.values().iter().all(|v| *v <= 1.0));
    }
}

#[test]
fn test_momentum_weights_three_assets() {
    let dates = business_days(d(2024, 1, 2), d(2024, 2, 29));
    let prices = (0..dates.len())
        .map(|i| {
            let x = i as f64;
            vec![100.0, 100.0 * 1.01f64.powf(x), 100.0 * 0.99f64.powf(x)]
        })
        .collect();
    let table = table(&["A", "B", "C"], dates, prices);

    let spec = StrategySpec::new("mom", MomentumTop1::new(5), Cadence::Monthly, 0.0);
    let result = Simulator::new(&table).run(&spec).unwrap();

    assert!(!result.rebalances.is_empty());
    for event in &result.rebalances {
        let w = event.weights.as_slice();
        assert!((w[0] - 0.2).abs() < 1e-12);
        assert!((w[1] - 0.6).abs() < 1e-12);
        assert!((w[2] - 0.2).abs() < 1e-12);
    }
}

#[test]
fn test_momentum_holds_equal_weight_during_warmup() {
    let table = create_synthetic_table(d(2024, 1, 2), d(2024, 5, 31));
    let spec = StrategySpec::new("mom", MomentumTop1::new(126), Cadence::Monthly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();
    // Fewer than 127 rows: no rebalance is ever eligible.
    assert!(table.len() <= 126);
    assert!(result.rebalances.is_empty());
}

#[test]
fn test_inverse_volatility_cap_on_named_asset() {
    let table = create_synthetic_table(d(2023, 1, 2), d(2023, 12, 29));
    let policy = InverseVolatilityCapped::new(60, 0.2, CapTarget::Asset("GLD".to_string()));
    let spec = StrategySpec::new("rp", policy, Cadence::Monthly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();

    assert!(!result.rebalances.is_empty());
    for event in &result.rebalances {
        let w = event.weights.as_slice();
        assert!(event.weights.is_normalized());
        // Gold is the least volatile series, so its raw weight exceeds the cap.
        assert!((w[0] - 0.2).abs() < 1e-12);
        assert!(w[1] > w[2]);
    }
}

#[test]
fn test_inverse_volatility_default_cap_bounds_most_volatile() {
    let table = create_synthetic_table(d(2023, 1, 2), d(2023, 12, 29));
    let spec = StrategySpec::new("rp", InverseVolatilityCapped::default(), Cadence::Monthly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();
    for event in &result.rebalances {
        assert!(event.weights.as_slice()[2] <= 0.2 + 1e-12);
        assert!(event.weights.is_normalized());
    }
}

#[test]
fn test_simulation_is_idempotent() {
    let table = create_synthetic_table(d(2022, 1, 3), d(2023, 12, 29));
    let specs = BacktestFileConfig::default().build_strategies().unwrap();
    let simulator = Simulator::new(&table);

    let first = simulator.run_all(&specs).unwrap();
    let second = simulator.run_all(&specs).unwrap();
    assert_eq!(first, second);

    let parallel = simulator.run_all_parallel(&specs).unwrap();
    assert_eq!(first, parallel);
}

#[test]
fn test_full_swap_fee() {
    let dates = business_days(d(2024, 1, 29), d(2024, 2, 2));
    let prices = vec![vec![10.0, 10.0]; dates.len()];
    let table = table(&["A", "B"], dates, prices);

    // Equal weight to all-in B: turnover 1.0 on Jan 31.
    let spec = StrategySpec::new("b", FixedWeights(vec![0.0, 1.0]), Cadence::Monthly, 0.001);
    let result = Simulator::new(&table).run(&spec).unwrap();
    assert!((result.rebalances[0].turnover - 1.0).abs() < 1e-12);
    assert!((result.rebalances[0].cost_factor - 0.999).abs() < 1e-12);

    // The final row closes February and swaps nothing.
    let total: f64 = result.rebalances.iter().map(|e| e.turnover).sum();
    assert!((total - 1.0).abs() < 1e-12);
    assert!((result.final_equity().unwrap() - 0.999).abs() < 1e-12);
}

#[test]
fn test_csv_to_summary_pipeline() {
    let source = create_synthetic_table(d(2022, 1, 3), d(2023, 6, 30));
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,GLD,SPY,BTC-USD").unwrap();
    for (date, row) in source.dates().iter().zip(source.prices()) {
        writeln!(file, "{},{},{},{}", date, row[0], row[1], row[2]).unwrap();
    }

    let config = BacktestFileConfig {
        data: DataSettings {
            path: Some(file.path().display().to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let table = config.load_prices().unwrap();
    assert_eq!(table.len(), source.len());
    assert_eq!(table.basket().names(), source.basket().names());

    let specs = config.build_strategies().unwrap();
    let results = Simulator::with_config(&table, config.to_simulator_config())
        .run_all(&specs)
        .unwrap();
    for result in &results {
        assert_eq!(result.equity.len(), table.len());
        assert_eq!(result.equity.first().unwrap().equity, 1.0);
    }

    let mut summary = PerformanceSummary::from_results(&results, config.backtest.risk_free_rate);
    assert_eq!(summary.len(), 3);
    let cagrs: Vec<f64> = summary.rows().iter().map(|r| r.stats.cagr.unwrap()).collect();
    assert!(cagrs.windows(2).all(|w| w[0] >= w[1]));
    for row in summary.rows() {
        assert!(row.stats.max_drawdown <= 0.0);
        assert!(row.stats.volatility.unwrap() > 0.0);
    }

    summary.sort_by(Metric::MaxDrawdown, SortOrder::Ascending);
    let mdds: Vec<f64> = summary.rows().iter().map(|r| r.stats.max_drawdown).collect();
    assert!(mdds.windows(2).all(|w| w[0] <= w[1]));

    let json = ResultFormatter::to_json(&summary);
    assert!(json.contains("B_Momentum6M"));
}

#[test]
fn test_date_filter_from_config() {
    let source = create_synthetic_table(d(2024, 1, 2), d(2024, 3, 29));
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,GLD,SPY,BTC-USD").unwrap();
    for (date, row) in source.dates().iter().zip(source.prices()) {
        writeln!(file, "{},{},{},{}", date, row[0], row[1], row[2]).unwrap();
    }

    let mut config = BacktestFileConfig::default();
    config.data.path = Some(file.path().display().to_string());
    config.backtest.start_date = Some("2024-02-01".to_string());
    config.backtest.end_date = Some("2024-02-29".to_string());

    let table = config.load_prices().unwrap();
    assert_eq!(table.first_date(), d(2024, 2, 1));
    assert_eq!(table.last_date(), d(2024, 2, 29));
}

#[test]
fn test_unsorted_csv_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "date,A,B").unwrap();
    writeln!(file, "2024-01-03,1.0,2.0").unwrap();
    writeln!(file, "2024-01-02,1.0,2.0").unwrap();

    let err = load_wide_csv(file.path(), &DataConfig::default()).unwrap_err();
    assert!(matches!(err, BacktestError::NonMonotonicDates { .. }));
}

#[test]
fn test_calendar_guard() {
    let table = create_synthetic_table(d(2024, 1, 2), d(2024, 3, 29));
    let config = SimulatorConfig {
        max_days: Some(10),
        ..Default::default()
    };
    let spec = StrategySpec::new("ew", EqualWeight, Cadence::Monthly, 0.001);
    let err = Simulator::with_config(&table, config).run(&spec).unwrap_err();
    assert!(matches!(err, BacktestError::CalendarTooLong { limit: 10, .. }));
}
