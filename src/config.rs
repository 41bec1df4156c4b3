//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for broker credentials and capital.

use anyhow::{Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::Symbol;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub indicators: IndicatorConfig,
}

impl Config {
    /// Load configuration from JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a config file
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("BROKER_API_KEY") {
            self.broker.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("BROKER_API_SECRET") {
            self.broker.api_secret = Some(api_secret);
        }
        if let Ok(capital) = std::env::var("INITIAL_CAPITAL") {
            if let Ok(v) = capital.parse() {
                self.trading.initial_capital = v;
            }
        }
    }
}

/// Broker API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub base_url: String,
    /// Per-request timeout in seconds; must stay below the scan interval
    pub request_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            api_key: None,
            api_secret: None,
            base_url: "https://api.groww.in".to_string(),
            request_timeout_secs: 3,
        }
    }
}

/// Scanner and market-session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub symbols: Vec<String>,
    /// Owner recorded on persisted trades
    #[serde(default = "default_user_id")]
    pub user_id: String,
    /// Initial trading capital in the same currency as the price data
    pub initial_capital: f64,
    pub scan_interval_secs: u64,
    pub candle_interval: String,
    pub candle_limit: usize,
    /// Market session open, local exchange time
    pub market_open: NaiveTime,
    /// Market session close, local exchange time
    pub market_close: NaiveTime,
}

impl Default for TradingConfig {
    fn default() -> Self {
        TradingConfig {
            symbols: vec![
                "RELIANCE".to_string(),
                "TCS".to_string(),
                "HDFCBANK".to_string(),
                "INFY".to_string(),
                "ICICIBANK".to_string(),
                "HINDUNILVR".to_string(),
                "SBIN".to_string(),
                "BHARTIARTL".to_string(),
                "KOTAKBANK".to_string(),
                "ITC".to_string(),
            ],
            user_id: default_user_id(),
            initial_capital: 100_000.0,
            scan_interval_secs: 5,
            candle_interval: "5m".to_string(),
            candle_limit: 100,
            market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            market_close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        }
    }
}

fn default_user_id() -> String {
    "auto_scanner".to_string()
}

impl TradingConfig {
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.iter().map(Symbol::new).collect()
    }
}

/// Risk limits, all percentages expressed as whole numbers (2.0 = 2%)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Percent of capital risked per trade
    pub max_position_size_pct: f64,
    /// Daily loss that halts trading for the rest of the day
    pub max_daily_loss_pct: f64,
    pub max_trades_per_day: u32,
    /// Fallback stop distance when ATR is unavailable
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_stop_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_position_size_pct: 2.0,
            max_daily_loss_pct: 5.0,
            max_trades_per_day: 50,
            stop_loss_pct: 1.5,
            take_profit_pct: 3.0,
            trailing_stop_pct: 1.0,
        }
    }
}

/// Default indicator parameters for the strategy registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub atr_period: usize,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub sma_short: usize,
    pub sma_long: usize,
    pub ema_short: usize,
    pub ema_long: usize,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    pub stochastic_period: usize,
    pub vwap_volume_mult: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            atr_period: 14,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std: 2.0,
            sma_short: 20,
            sma_long: 50,
            ema_short: 12,
            ema_long: 26,
            supertrend_period: 10,
            supertrend_multiplier: 3.0,
            stochastic_period: 14,
            vwap_volume_mult: 1.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.trading.initial_capital, 100_000.0);
        assert_eq!(config.risk.max_position_size_pct, 2.0);
        assert_eq!(config.risk.max_daily_loss_pct, 5.0);
        assert_eq!(config.risk.max_trades_per_day, 50);
        assert_eq!(config.trading.scan_interval_secs, 5);
        assert_eq!(config.trading.market_open, NaiveTime::from_hms_opt(9, 15, 0).unwrap());
        assert_eq!(config.trading.market_close, NaiveTime::from_hms_opt(15, 30, 0).unwrap());
    }

    #[test]
    fn test_symbols_accessor() {
        let config = Config::default();
        let symbols = config.trading.symbols();
        assert_eq!(symbols.len(), 10);
        assert_eq!(symbols[0].as_str(), "RELIANCE");
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let json = r#"{"trading": {"symbols": ["TCS"], "initial_capital": 50000.0,
            "scan_interval_secs": 10, "candle_interval": "1m", "candle_limit": 80,
            "market_open": "09:15:00", "market_close": "15:30:00"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.trading.initial_capital, 50_000.0);
        assert_eq!(config.risk.max_trades_per_day, 50);
        assert_eq!(config.indicators.rsi_period, 14);
    }
}
