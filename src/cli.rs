//! Command-line interface for the rebalancing backtester.

use rebal::analytics::{Metric, PerformanceSummary, ResultFormatter, SortOrder};
use rebal::config::BacktestFileConfig;
use rebal::data::{load_wide_csv, reindex_business_days, DataConfig};
use rebal::error::Result;
use rebal::policy::{InverseVolatilityCapped, MomentumTop1};
use rebal::simulator::{SimulationResult, Simulator};

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rebal - a multi-strategy portfolio rebalancing backtester.
#[derive(Parser)]
#[command(name = "rebal")]
#[command(version = "0.1.0")]
#[command(about = "Backtest periodic rebalancing strategies over a multi-asset price history")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured strategy and print the summary
    Run {
        /// Path to TOML configuration file (built-in roster if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Wide price CSV (date column then one column per asset); overrides the config's data section
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Metric to sort the summary by
        #[arg(long, value_enum, default_value = "cagr")]
        sort_by: SortMetric,

        /// Sort ascending instead of descending
        #[arg(long)]
        ascending: bool,

        /// Simulate strategies in parallel
        #[arg(long)]
        parallel: bool,

        /// Override the annual risk-free rate
        #[arg(long)]
        risk_free_rate: Option<f64>,

        /// Write every equity curve to this CSV
        #[arg(long)]
        equity_out: Option<PathBuf>,

        /// Write the summary table to this CSV
        #[arg(long)]
        summary_out: Option<PathBuf>,
    },

    /// Show information about available weight policies
    Strategies,

    /// Validate a wide price CSV
    Validate {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "rebal.toml")]
        output: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SortMetric {
    Cagr,
    Volatility,
    Sharpe,
    MaxDrawdown,
}

impl From<SortMetric> for Metric {
    fn from(metric: SortMetric) -> Self {
        match metric {
            SortMetric::Cagr => Metric::Cagr,
            SortMetric::Volatility => Metric::Volatility,
            SortMetric::Sharpe => Metric::Sharpe,
            SortMetric::MaxDrawdown => Metric::MaxDrawdown,
        }
    }
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Failed to set tracing subscriber");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            config,
            data,
            sort_by,
            ascending,
            parallel,
            risk_free_rate,
            equity_out,
            summary_out,
        } => {
            let options = RunOptions {
                sort_by: (*sort_by).into(),
                order: if *ascending {
                    SortOrder::Ascending
                } else {
                    SortOrder::Descending
                },
                parallel: *parallel,
                risk_free_rate: *risk_free_rate,
                equity_out: equity_out.clone(),
                summary_out: summary_out.clone(),
            };
            run_backtest(config.as_ref(), data.as_ref(), &options, cli.output)
        }

        Commands::Strategies => {
            print_strategies();
            Ok(())
        }

        Commands::Validate { data } => validate_data(data),

        Commands::Init { output } => init_config(output),
    }
}

struct RunOptions {
    sort_by: Metric,
    order: SortOrder,
    parallel: bool,
    risk_free_rate: Option<f64>,
    equity_out: Option<PathBuf>,
    summary_out: Option<PathBuf>,
}

fn run_backtest(
    config_path: Option<&PathBuf>,
    data_path: Option<&PathBuf>,
    options: &RunOptions,
    output: OutputFormat,
) -> Result<()> {
    let mut file_config = match config_path {
        Some(path) => BacktestFileConfig::load(path)?,
        None => BacktestFileConfig::default(),
    };
    if let Some(path) = data_path {
        file_config.data.path = Some(path.display().to_string());
        file_config.data.assets.clear();
    }
    if let Some(rf) = options.risk_free_rate {
        file_config.backtest.risk_free_rate = rf;
    }

    let table = file_config.load_prices()?;
    info!(
        "Loaded {} days for {} from {} to {}",
        table.len(),
        table.basket(),
        table.first_date(),
        table.last_date()
    );

    let strategies = file_config.build_strategies()?;
    let simulator = Simulator::with_config(&table, file_config.to_simulator_config());

    let results = if options.parallel || file_config.backtest.parallel {
        simulator.run_all_parallel(&strategies)?
    } else {
        simulator.run_all(&strategies)?
    };

    let mut summary = PerformanceSummary::from_results(&results, file_config.backtest.risk_free_rate);
    summary.sort_by(options.sort_by, options.order);

    match output {
        OutputFormat::Text => {
            println!(
                "Data: {} | {} to {} ({} days)",
                table.basket(),
                table.first_date(),
                table.last_date(),
                table.len()
            );
            ResultFormatter::print_summary(&summary, &format!("Strategy Summary (by {})", options.sort_by));
            print_rebalance_counts(&results);
        }
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&summary)),
        OutputFormat::Csv => ResultFormatter::write_summary(&summary, io::stdout().lock())?,
    }

    if let Some(path) = &options.equity_out {
        ResultFormatter::write_equity_csv(&results, path)?;
        info!("Equity curves written to {}", path.display());
    }
    if let Some(path) = &options.summary_out {
        ResultFormatter::write_summary_csv(&summary, path)?;
        info!("Summary written to {}", path.display());
    }

    Ok(())
}

fn print_rebalance_counts(results: &[SimulationResult]) {
    println!("\nRebalances:");
    for result in results {
        println!(
            "  {:<20} {:>4} events, total turnover {:.4}",
            result.strategy_name,
            result.rebalances.len(),
            result.total_turnover()
        );
    }
}

fn print_strategies() {
    println!("\nAvailable Weight Policies:\n");

    println!("  equal-weight");
    println!("    1/N in every asset on each rebalance date.");
    println!("    Parameters: cadence");
    println!();

    println!("  momentum");
    println!("    Overweight the asset with the best trailing return; split the rest evenly.");
    println!(
        "    Parameters: lookback (default: {}), top_weight (default: {})",
        MomentumTop1::DEFAULT_LOOKBACK,
        MomentumTop1::DEFAULT_TOP_WEIGHT
    );
    println!("    Holds equal weight until the lookback window is available.");
    println!();

    println!("  inverse-volatility");
    println!("    Weights proportional to 1/annualized volatility, with one asset capped.");
    println!(
        "    Parameters: lookback (default: {}), cap (default: {}), cap_asset (default: most volatile)",
        InverseVolatilityCapped::DEFAULT_LOOKBACK,
        InverseVolatilityCapped::DEFAULT_CAP
    );
    println!("    Excess above the cap is redistributed to the other assets pro rata.");
    println!();

    println!("Every strategy takes cadence = \"monthly\" | \"quarterly\" and an optional fee_rate.");
    println!("Use 'rebal init' to write an example configuration.");
    println!();
}

fn init_config(output: &PathBuf) -> Result<()> {
    let example = BacktestFileConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize your backtest, then run:");
    println!("  rebal run -c {}", output.display());
    Ok(())
}

fn validate_data(data_path: &PathBuf) -> Result<()> {
    println!("Validating data file: {}", data_path.display());

    let table = load_wide_csv(data_path, &DataConfig::default())?;

    println!("\nData Summary:");
    println!("  Rows: {}", table.len());
    println!("  Assets: {}", table.basket());
    println!("  Start: {}", table.first_date());
    println!("  End: {}", table.last_date());

    for (i, asset) in table.basket().iter().enumerate() {
        let closes = table.column(i);
        let min_price = closes.iter().fold(f64::INFINITY, |a: f64, &b| a.min(b));
        let max_price = closes.iter().fold(f64::NEG_INFINITY, |a: f64, &b| a.max(b));
        println!("  {:<12} Price Range: {:.2} - {:.2}", asset, min_price, max_price);
    }

    let aligned = reindex_business_days(&table)?;
    println!("  Business days after forward fill: {}", aligned.len());

    println!("\nValidation: PASSED");
    Ok(())
}
