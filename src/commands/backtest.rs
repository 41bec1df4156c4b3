//! Backtest command

use anyhow::{Context, Result};
use tracing::info;

use equity_engine::backtest::Backtester;
use equity_engine::config::Config;
use equity_engine::data::load_multi_symbol;
use equity_engine::voting::{map_strategy_names, STRATEGY_KEYS};

pub fn run(config_path: Option<String>, data_dir: String, strategies: Option<String>) -> Result<()> {
    dotenv::dotenv().ok();

    let config = match config_path {
        Some(path) => Config::from_file(&path)
            .context(format!("Failed to load config from {}", path))?,
        None => Config::from_env(),
    };

    let symbols = config.trading.symbols();
    let data = load_multi_symbol(&data_dir, &symbols, &config.trading.candle_interval)
        .context("Failed to load backtest data")?;

    let active_keys = match strategies {
        Some(list) => {
            let names: Vec<String> = list.split(',').map(|s| s.trim().to_string()).collect();
            let mapped = map_strategy_names(&names);
            if mapped.is_empty() {
                anyhow::bail!("No recognizable strategies in: {}", list);
            }
            mapped
        }
        None => STRATEGY_KEYS.to_vec(),
    };

    info!("Backtesting with strategies: {:?}", active_keys);

    let backtester = Backtester::new(config, active_keys);
    let result = backtester.run(&data);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
