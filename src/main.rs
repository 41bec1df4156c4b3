//! Equity engine - main entry point
//!
//! This binary provides two subcommands:
//! - run: start the market scanner (simulation or live)
//! - backtest: replay historical CSV data through the strategy mix

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "equity-engine")]
#[command(about = "Autonomous multi-strategy trading engine for equity markets", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the market scanner
    Run {
        /// Path to configuration file (defaults + env when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Live trading through the broker API (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,

        /// Scan interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// Trade database path
        #[arg(long, default_value = "state/trades.db")]
        state_db: String,
    },

    /// Run a strategy-mix backtest over CSV data
    Backtest {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,

        /// Directory holding {symbol}_{interval}.csv files
        #[arg(short, long, default_value = "data")]
        data_dir: String,

        /// Strategies to activate (comma-separated names); all when omitted
        #[arg(short, long)]
        strategies: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Backtest { .. } => "backtest",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run {
            config,
            live,
            interval,
            state_db,
        } => commands::run::run(config, live, interval, state_db),

        Commands::Backtest {
            config,
            data_dir,
            strategies,
        } => commands::backtest::run(config, data_dir, strategies),
    }
}
