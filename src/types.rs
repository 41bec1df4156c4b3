//! Core data types used across the trading engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error)]
pub enum CandleValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("volume ({0}) must be >= 0")]
    NegativeVolume(f64),

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub datetime: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        datetime: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            datetime,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        if self.open <= 0.0 || self.high <= 0.0 || self.low <= 0.0 || self.close <= 0.0 {
            return Err(CandleValidationError::NonPositivePrice {
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        if self.volume < 0.0 {
            return Err(CandleValidationError::NegativeVolume(self.volume));
        }

        if self.open < self.low || self.open > self.high {
            return Err(CandleValidationError::OpenOutOfRange {
                open: self.open,
                low: self.low,
                high: self.high,
            });
        }

        if self.close < self.low || self.close > self.high {
            return Err(CandleValidationError::CloseOutOfRange {
                close: self.close,
                low: self.low,
                high: self.high,
            });
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// OHLCV window in column layout.
///
/// Indicators and strategies only need indexed access to the numeric columns,
/// so candles are transposed once into struct-of-arrays form per scan. The
/// last index is always the most recent bar.
#[derive(Debug, Clone, Default)]
pub struct Window {
    pub timestamps: Vec<DateTime<Utc>>,
    pub open: Vec<f64>,
    pub high: Vec<f64>,
    pub low: Vec<f64>,
    pub close: Vec<f64>,
    pub volume: Vec<f64>,
}

impl Window {
    pub fn from_candles(candles: &[Candle]) -> Self {
        let mut w = Window {
            timestamps: Vec::with_capacity(candles.len()),
            open: Vec::with_capacity(candles.len()),
            high: Vec::with_capacity(candles.len()),
            low: Vec::with_capacity(candles.len()),
            close: Vec::with_capacity(candles.len()),
            volume: Vec::with_capacity(candles.len()),
        };
        for c in candles {
            w.timestamps.push(c.datetime);
            w.open.push(c.open);
            w.high.push(c.high);
            w.low.push(c.low);
            w.close.push(c.close);
            w.volume.push(c.volume);
        }
        w
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }

    /// Most recent close, if any bars are present
    pub fn last_close(&self) -> Option<f64> {
        self.close.last().copied()
    }
}

/// Instrument symbol using Arc<str> for cheap cloning
///
/// Symbols are cloned on every per-symbol task spawn, signal event, and
/// position key. Arc<str> keeps those clones O(1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

/// Custom serde for Arc<str>
mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction
    pub fn entry_order(&self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// Order side that closes a position in this direction
    pub fn exit_order(&self) -> &'static str {
        match self {
            Side::Long => "SELL",
            Side::Short => "BUY",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    EngineStop,
    External,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::EngineStop => "ENGINE_STOP",
            ExitReason::External => "EXTERNAL",
        };
        write!(f, "{}", s)
    }
}

/// A currently-held exposure in one symbol.
///
/// Quantity is fixed for the life of the position; only the trailing stop and
/// the favorable-extreme trackers mutate between ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_stop: Option<f64>,
    /// Highest price observed since entry (long positions)
    pub highest_price: Option<f64>,
    /// Lowest price observed since entry (short positions)
    pub lowest_price: Option<f64>,
}

impl Position {
    /// Mark-to-market PnL at the given price
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) * self.quantity as f64,
            Side::Short => (self.entry_price - current_price) * self.quantity as f64,
        }
    }
}

/// Completed trade record, produced when a position closes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: u32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub pnl: f64,
    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    /// Return percentage relative to entry
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        let pct = match self.side {
            Side::Long => (self.exit_price - self.entry_price) / self.entry_price,
            Side::Short => (self.entry_price - self.exit_price) / self.entry_price,
        };
        pct * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            datetime: Utc::now(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_candle_validation() {
        assert!(candle(100.0, 105.0, 95.0, 102.0).is_valid());
        assert!(!candle(100.0, 90.0, 95.0, 102.0).is_valid()); // high < low
        assert!(!candle(100.0, 105.0, 101.0, 102.0).is_valid()); // open below low
        assert!(!candle(-1.0, 105.0, 95.0, 102.0).is_valid());
    }

    #[test]
    fn test_window_from_candles() {
        let candles = vec![candle(10.0, 11.0, 9.0, 10.5), candle(10.5, 12.0, 10.0, 11.5)];
        let w = Window::from_candles(&candles);
        assert_eq!(w.len(), 2);
        assert_eq!(w.close, vec![10.5, 11.5]);
        assert_eq!(w.last_close(), Some(11.5));
    }

    #[test]
    fn test_symbol_roundtrip() {
        let symbol = Symbol::new("RELIANCE");
        assert_eq!(symbol.as_str(), "RELIANCE");
        let json = serde_json::to_string(&symbol).unwrap();
        let parsed: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(symbol, parsed);
    }

    #[test]
    fn test_unrealized_pnl_by_side() {
        let mut pos = Position {
            symbol: Symbol::new("TCS"),
            side: Side::Long,
            quantity: 10,
            entry_price: 100.0,
            entry_time: Utc::now(),
            stop_loss: 90.0,
            take_profit: 120.0,
            trailing_stop: None,
            highest_price: Some(100.0),
            lowest_price: None,
        };
        assert_eq!(pos.unrealized_pnl(105.0), 50.0);

        pos.side = Side::Short;
        assert_eq!(pos.unrealized_pnl(105.0), -50.0);
    }

    #[test]
    fn test_trade_return_pct() {
        let trade = ClosedTrade {
            symbol: Symbol::new("INFY"),
            side: Side::Short,
            quantity: 5,
            entry_price: 200.0,
            exit_price: 190.0,
            entry_time: Utc::now(),
            exit_time: Utc::now(),
            pnl: 50.0,
            exit_reason: ExitReason::TakeProfit,
        };
        assert_eq!(trade.return_pct(), 5.0);
    }
}
