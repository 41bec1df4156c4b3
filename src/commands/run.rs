//! Scanner command
//!
//! Builds the port stack (broker-backed in live mode, simulation otherwise),
//! starts the scan loop, and stops it cleanly on Ctrl+C. Stopping closes
//! every open position before the process exits.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use equity_engine::config::Config;
use equity_engine::data::{MarketData, SimulatedMarketData};
use equity_engine::engine::{EngineMode, MarketScanner};
use equity_engine::exchange::{BrokerClient, BrokerExecutor, BrokerMarketData, OrderExecutor, SimulatedExecutor};
use equity_engine::persistence::SqliteTradeStore;

pub fn run(
    config_path: Option<String>,
    live: bool,
    interval: Option<u64>,
    state_db: String,
) -> Result<()> {
    dotenv::dotenv().ok();

    let mut config = match config_path {
        Some(path) => Config::from_file(&path)
            .context(format!("Failed to load config from {}", path))?,
        None => Config::from_env(),
    };
    if let Some(secs) = interval {
        config.trading.scan_interval_secs = secs;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run_async(config, live, state_db))
}

async fn run_async(config: Config, live: bool, state_db: String) -> Result<()> {
    let store = Arc::new(SqliteTradeStore::new(&state_db)?);

    let (market_data, executor, mode): (Arc<dyn MarketData>, Arc<dyn OrderExecutor>, EngineMode) =
        if live {
            let api_key = config
                .broker
                .api_key
                .clone()
                .context("BROKER_API_KEY is required for live mode")?;
            let api_secret = config
                .broker
                .api_secret
                .clone()
                .context("BROKER_API_SECRET is required for live mode")?;

            let client = BrokerClient::new(
                api_key,
                api_secret,
                config.broker.base_url.clone(),
                Duration::from_secs(config.broker.request_timeout_secs),
            )?;

            warn!("LIVE TRADING MODE - REAL MONEY AT RISK");
            (
                Arc::new(BrokerMarketData::new(client.clone())),
                Arc::new(BrokerExecutor::new(client)),
                EngineMode::Live,
            )
        } else {
            (
                Arc::new(SimulatedMarketData::new()),
                Arc::new(SimulatedExecutor),
                EngineMode::Simulation,
            )
        };

    info!(
        "Starting scanner: mode={} capital={:.2} watchlist=[{}]",
        mode,
        config.trading.initial_capital,
        config.trading.symbols.join(", ")
    );

    let scanner = Arc::new(MarketScanner::new(config, mode, market_data, executor, store));

    let loop_handle = tokio::spawn(scanner.clone().run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Ctrl+C received, stopping scanner...");
    scanner.stop();

    loop_handle.await.context("Scanner task failed")?;

    let status = scanner.status();
    info!(
        "Session ended: scans={} capital={:.2} daily_pnl={:+.2}",
        status.scan_count, status.current_capital, status.daily_pnl
    );

    Ok(())
}
