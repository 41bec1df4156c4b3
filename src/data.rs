//! Market data access
//!
//! Defines the market-data port consumed by the scanner, a deterministic
//! simulation used when no broker is configured, and CSV loading for
//! backtests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::distributions::Distribution;
use rand::Rng;
use statrs::distribution::Normal;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tracing::{info, warn};

use crate::{Candle, Symbol};

/// Port for fetching OHLCV windows.
///
/// Failures and empty results mean "skip this symbol for the tick"; they
/// never abort a scan.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>>;
}

/// Parse an interval string like "5m", "1h", "1d" into a bar duration
pub fn parse_interval(interval: &str) -> Duration {
    let (digits, unit) = interval.split_at(interval.len().saturating_sub(1));
    let n: i64 = digits.parse().unwrap_or(5);
    match unit {
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        _ => Duration::minutes(n),
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Simulated market data: a geometric random walk per symbol.
///
/// The base price is a stable hash of the symbol, so repeated fetches for the
/// same symbol stay in the same price regime within a process.
pub struct SimulatedMarketData {
    log_return: Normal,
}

impl SimulatedMarketData {
    pub fn new() -> Self {
        SimulatedMarketData {
            // Per-bar log-return distribution N(0, 0.001)
            log_return: Normal::new(0.0, 0.001).expect("valid normal parameters"),
        }
    }

    /// Stable per-symbol base price in the 100..2500 band
    pub fn base_price(symbol: &Symbol) -> f64 {
        let mut hasher = DefaultHasher::new();
        symbol.as_str().hash(&mut hasher);
        100.0 + (hasher.finish() % 2400) as f64
    }
}

impl Default for SimulatedMarketData {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketData for SimulatedMarketData {
    async fn fetch(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let mut rng = rand::thread_rng();
        let bar = parse_interval(interval);
        let start = Utc::now() - bar * limit as i32;

        let mut candles = Vec::with_capacity(limit);
        let mut close = Self::base_price(symbol);

        for i in 0..limit {
            close *= self.log_return.sample(&mut rng).exp();
            let open = close * (1.0 + rng.gen_range(-0.005..0.005));
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(1_000.0..100_000.0);

            candles.push(Candle {
                datetime: start + bar * (i as i32 + 1),
                open,
                high,
                low,
                close,
                volume,
            });
        }

        Ok(candles)
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

/// Load OHLCV data from CSV file
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Candle>> {
    let mut reader = csv::Reader::from_path(path.as_ref()).context("Failed to open CSV file")?;

    let mut candles = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let dt_str = record.get(0).context("Missing datetime column")?;
        let datetime = dt_str
            .parse::<DateTime<Utc>>()
            .or_else(|_| {
                // Try parsing without timezone and assume UTC
                chrono::NaiveDateTime::parse_from_str(dt_str, "%Y-%m-%d %H:%M:%S")
                    .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
            })
            .context(format!("Failed to parse datetime: {}", dt_str))?;

        let open: f64 = record
            .get(1)
            .context("Missing open column")?
            .parse()
            .context("Failed to parse open")?;
        let high: f64 = record
            .get(2)
            .context("Missing high column")?
            .parse()
            .context("Failed to parse high")?;
        let low: f64 = record
            .get(3)
            .context("Missing low column")?
            .parse()
            .context("Failed to parse low")?;
        let close: f64 = record
            .get(4)
            .context("Missing close column")?
            .parse()
            .context("Failed to parse close")?;
        let volume: f64 = record
            .get(5)
            .context("Missing volume column")?
            .parse()
            .context("Failed to parse volume")?;

        candles.push(Candle {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    Ok(candles)
}

/// Load data for multiple symbols from CSV files named `{symbol}_{interval}.csv`
pub fn load_multi_symbol(
    data_dir: impl AsRef<Path>,
    symbols: &[Symbol],
    interval: &str,
) -> Result<HashMap<Symbol, Vec<Candle>>> {
    let mut data = HashMap::new();

    for symbol in symbols {
        let filename = format!("{}_{}.csv", symbol.as_str(), interval);
        let path = data_dir.as_ref().join(&filename);

        if !path.exists() {
            warn!("Data file not found: {}", path.display());
            continue;
        }

        let candles = load_csv(&path).context(format!("Failed to load data for {}", symbol))?;

        info!("Loaded {} candles for {}", candles.len(), symbol);
        data.insert(symbol.clone(), candles);
    }

    if data.is_empty() {
        anyhow::bail!("No data loaded for any symbol");
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("5m"), Duration::minutes(5));
        assert_eq!(parse_interval("1h"), Duration::hours(1));
        assert_eq!(parse_interval("1d"), Duration::days(1));
        assert_eq!(parse_interval("junk"), Duration::minutes(5));
    }

    #[test]
    fn test_base_price_stable_and_in_band() {
        let symbol = Symbol::new("RELIANCE");
        let a = SimulatedMarketData::base_price(&symbol);
        let b = SimulatedMarketData::base_price(&symbol);
        assert_eq!(a, b);
        assert!((100.0..2500.0).contains(&a));
    }

    #[tokio::test]
    async fn test_simulation_produces_valid_window() {
        let sim = SimulatedMarketData::new();
        let symbol = Symbol::new("TCS");
        let candles = sim.fetch(&symbol, "5m", 100).await.unwrap();

        assert_eq!(candles.len(), 100);
        let base = SimulatedMarketData::base_price(&symbol);

        for c in &candles {
            assert!(c.is_valid(), "invalid candle: {:?}", c);
            assert!((1_000.0..100_000.0).contains(&c.volume));
        }

        // The walk drifts a fraction of a percent per bar; over 100 bars it
        // must stay in the neighborhood of the base price
        let last = candles.last().unwrap().close;
        assert!(last > base * 0.8 && last < base * 1.2);

        // Bars are ordered and end near now
        for pair in candles.windows(2) {
            assert!(pair[0].datetime < pair[1].datetime);
        }
        let age = Utc::now() - candles.last().unwrap().datetime;
        assert!(age.num_seconds().abs() < 60);
    }
}
