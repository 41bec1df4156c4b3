//! Money management and risk control
//!
//! Owns all mutable trading state: capital, open positions, daily limits,
//! trade history, and the equity curve. Position sizing is volatility-based
//! (2x ATR stop distance), exits are evaluated in strict priority order, and
//! a daily loss gate halts entries for the rest of the calendar day.
//!
//! All monetary values are dimensionless `f64`; the system works in any
//! currency as long as capital and price data share one denomination.

use chrono::{Local, NaiveDate, Utc};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use crate::config::RiskConfig;
use crate::types::{ClosedTrade, ExitReason, Position, Side, Symbol};

/// Trading days per year, used to annualize the Sharpe ratio
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Invariant violations; these are programming errors, not trading outcomes
#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("position already open for {0}")]
    PositionExists(Symbol),

    #[error("quantity must be positive for {0}")]
    NonPositiveQuantity(Symbol),
}

/// Why an entry was denied. Denials are first-class outcomes recorded on the
/// signal event, never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeBlock {
    DailyLossLimit,
    MaxDailyTrades,
}

impl std::fmt::Display for TradeBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeBlock::DailyLossLimit => write!(f, "DAILY_LOSS_LIMIT"),
            TradeBlock::MaxDailyTrades => write!(f, "MAX_DAILY_TRADES"),
        }
    }
}

/// Session risk metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct RiskMetrics {
    pub total_capital: f64,
    pub available_capital: f64,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
}

/// Money manager: position sizing, lifecycle, daily gating, metrics
pub struct MoneyManager {
    config: RiskConfig,
    pub initial_capital: f64,
    pub current_capital: f64,
    positions: HashMap<Symbol, Position>,
    pub daily_pnl: f64,
    pub daily_trades: u32,
    trade_history: Vec<ClosedTrade>,
    equity_curve: Vec<f64>,
    pub last_reset_date: NaiveDate,
}

impl MoneyManager {
    pub fn new(initial_capital: f64, config: RiskConfig) -> Self {
        MoneyManager {
            config,
            initial_capital,
            current_capital: initial_capital,
            positions: HashMap::new(),
            daily_pnl: 0.0,
            daily_trades: 0,
            trade_history: Vec::new(),
            equity_curve: vec![initial_capital],
            last_reset_date: Local::now().date_naive(),
        }
    }

    /// Zero the daily counters once the local calendar date has advanced
    pub fn reset_daily_stats(&mut self) {
        let today = Local::now().date_naive();
        if today > self.last_reset_date {
            self.daily_pnl = 0.0;
            self.daily_trades = 0;
            self.last_reset_date = today;
        }
    }

    /// Check the daily risk gates. Returns the blocking reason, if any.
    pub fn can_trade(&mut self) -> Result<(), TradeBlock> {
        self.reset_daily_stats();

        let daily_loss_limit = self.initial_capital * (self.config.max_daily_loss_pct / 100.0);
        if self.daily_pnl <= -daily_loss_limit {
            return Err(TradeBlock::DailyLossLimit);
        }

        if self.daily_trades >= self.config.max_trades_per_day {
            return Err(TradeBlock::MaxDailyTrades);
        }

        Ok(())
    }

    /// ATR-based position sizing.
    ///
    /// Sizes the trade so that a 2x-ATR adverse move loses at most
    /// `max_position_size_pct` of current capital, clamped to at least one
    /// share and at most what capital can buy. Returns 0 when even one share
    /// is unaffordable.
    pub fn calculate_position_size(&self, price: f64, atr: f64) -> u32 {
        if price <= 0.0 {
            return 0;
        }

        let risk_amount = self.current_capital * (self.config.max_position_size_pct / 100.0);
        let stop_distance = if atr > 0.0 {
            atr * 2.0
        } else {
            price * (self.config.stop_loss_pct / 100.0)
        };

        let shares = if stop_distance > 0.0 {
            (risk_amount / stop_distance).floor() as u64
        } else {
            (risk_amount / price).floor() as u64
        };

        let shares = shares.max(1);
        let max_shares = (self.current_capital / price).floor() as u64;
        shares.min(max_shares) as u32
    }

    fn stop_loss_for(&self, entry_price: f64, side: Side, atr: f64) -> f64 {
        let stop_distance = atr * 2.0;
        match side {
            Side::Long => entry_price - stop_distance,
            Side::Short => entry_price + stop_distance,
        }
    }

    fn take_profit_for(&self, entry_price: f64, side: Side, atr: f64) -> f64 {
        let profit_distance = atr * 4.0;
        match side {
            Side::Long => entry_price + profit_distance,
            Side::Short => entry_price - profit_distance,
        }
    }

    /// Open a position, deducting its notional from capital.
    ///
    /// Increments the daily trade counter. A second position on the same
    /// symbol, or a zero quantity, is an invariant violation.
    pub fn open_position(
        &mut self,
        symbol: &Symbol,
        side: Side,
        quantity: u32,
        price: f64,
        atr: f64,
    ) -> Result<Position, MoneyError> {
        if self.positions.contains_key(symbol) {
            return Err(MoneyError::PositionExists(symbol.clone()));
        }
        if quantity == 0 {
            return Err(MoneyError::NonPositiveQuantity(symbol.clone()));
        }

        let position = Position {
            symbol: symbol.clone(),
            side,
            quantity,
            entry_price: price,
            entry_time: Utc::now(),
            stop_loss: self.stop_loss_for(price, side, atr),
            take_profit: self.take_profit_for(price, side, atr),
            trailing_stop: None,
            highest_price: (side == Side::Long).then_some(price),
            lowest_price: (side == Side::Short).then_some(price),
        };

        self.positions.insert(symbol.clone(), position.clone());
        self.daily_trades += 1;
        self.current_capital -= quantity as f64 * price;

        info!(
            "Opened {} {} qty={} @ {:.2} | SL={:.2} TP={:.2}",
            side, symbol, quantity, price, position.stop_loss, position.take_profit
        );

        Ok(position)
    }

    /// Ratchet the trailing stop toward the current price on favorable moves.
    ///
    /// The stop trails the best price seen by a fixed fraction of the entry
    /// price and never loosens.
    pub fn update_trailing_stop(&mut self, symbol: &Symbol, current_price: f64) {
        let Some(position) = self.positions.get_mut(symbol) else {
            return;
        };

        let trailing_distance = position.entry_price * (self.config.trailing_stop_pct / 100.0);

        match position.side {
            Side::Long => {
                if position.highest_price.map_or(true, |h| current_price > h) {
                    position.highest_price = Some(current_price);
                    let new_stop = current_price - trailing_distance;
                    if position.trailing_stop.map_or(true, |t| new_stop > t) {
                        position.trailing_stop = Some(new_stop);
                    }
                }
            }
            Side::Short => {
                if position.lowest_price.map_or(true, |l| current_price < l) {
                    position.lowest_price = Some(current_price);
                    let new_stop = current_price + trailing_distance;
                    if position.trailing_stop.map_or(true, |t| new_stop < t) {
                        position.trailing_stop = Some(new_stop);
                    }
                }
            }
        }
    }

    /// Evaluate exit rules for the symbol at the current price.
    ///
    /// Refreshes the trailing stop first. Priority among simultaneously
    /// triggered exits: stop loss, then trailing stop, then take profit.
    pub fn should_exit(&mut self, symbol: &Symbol, current_price: f64) -> Option<ExitReason> {
        if !self.positions.contains_key(symbol) {
            return None;
        }

        self.update_trailing_stop(symbol, current_price);
        let position = &self.positions[symbol];

        match position.side {
            Side::Long => {
                if current_price <= position.stop_loss {
                    return Some(ExitReason::StopLoss);
                }
                if position
                    .trailing_stop
                    .is_some_and(|t| current_price <= t)
                {
                    return Some(ExitReason::TrailingStop);
                }
                if current_price >= position.take_profit {
                    return Some(ExitReason::TakeProfit);
                }
            }
            Side::Short => {
                if current_price >= position.stop_loss {
                    return Some(ExitReason::StopLoss);
                }
                if position
                    .trailing_stop
                    .is_some_and(|t| current_price >= t)
                {
                    return Some(ExitReason::TrailingStop);
                }
                if current_price <= position.take_profit {
                    return Some(ExitReason::TakeProfit);
                }
            }
        }

        None
    }

    /// Close the position, realize PnL, and snapshot the equity curve.
    ///
    /// Returns the realized PnL, or `None` when no position exists.
    pub fn close_position(
        &mut self,
        symbol: &Symbol,
        exit_price: f64,
        reason: ExitReason,
    ) -> Option<f64> {
        let position = self.positions.remove(symbol)?;

        let pnl = match position.side {
            Side::Long => (exit_price - position.entry_price) * position.quantity as f64,
            Side::Short => (position.entry_price - exit_price) * position.quantity as f64,
        };

        self.current_capital += position.quantity as f64 * exit_price;
        self.daily_pnl += pnl;
        self.equity_curve.push(self.current_capital);

        self.trade_history.push(ClosedTrade {
            symbol: symbol.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time: Utc::now(),
            pnl,
            exit_reason: reason,
        });

        info!(
            "Closed {} {} qty={} @ {:.2} | PnL={:+.2} | {}",
            position.side, symbol, position.quantity, exit_price, pnl, reason
        );

        Some(pnl)
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn has_position(&self, symbol: &Symbol) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn open_symbols(&self) -> Vec<Symbol> {
        self.positions.keys().cloned().collect()
    }

    pub fn trade_history(&self) -> &[ClosedTrade] {
        &self.trade_history
    }

    pub fn equity_curve(&self) -> &[f64] {
        &self.equity_curve
    }

    /// Current risk metrics over the session's closed trades
    pub fn get_risk_metrics(&self) -> RiskMetrics {
        if self.trade_history.is_empty() {
            return RiskMetrics {
                total_capital: self.initial_capital,
                available_capital: self.current_capital,
                daily_pnl: self.daily_pnl,
                daily_trades: self.daily_trades,
                max_drawdown: 0.0,
                win_rate: 0.0,
                profit_factor: 0.0,
                sharpe_ratio: 0.0,
            };
        }

        let wins = self.trade_history.iter().filter(|t| t.pnl > 0.0).count();
        let win_rate = wins as f64 / self.trade_history.len() as f64 * 100.0;

        let gross_profit: f64 = self
            .trade_history
            .iter()
            .filter(|t| t.pnl > 0.0)
            .map(|t| t.pnl)
            .sum();
        let gross_loss: f64 = self
            .trade_history
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| t.pnl)
            .sum::<f64>()
            .abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        RiskMetrics {
            total_capital: self.initial_capital,
            available_capital: self.current_capital,
            daily_pnl: self.daily_pnl,
            daily_trades: self.daily_trades,
            max_drawdown: max_drawdown_pct(&self.equity_curve),
            win_rate,
            profit_factor,
            sharpe_ratio: sharpe_ratio(&self.equity_curve),
        }
    }

    /// Suggested capital fraction per trade from the session's trade record,
    /// half-Kelly, clamped to the configured position size cap
    pub fn kelly_fraction(&self) -> f64 {
        let wins: Vec<f64> = self
            .trade_history
            .iter()
            .filter(|t| t.pnl > 0.0)
            .map(|t| t.pnl)
            .collect();
        let losses: Vec<f64> = self
            .trade_history
            .iter()
            .filter(|t| t.pnl < 0.0)
            .map(|t| t.pnl)
            .collect();

        if self.trade_history.is_empty() {
            return 0.0;
        }

        let win_rate = wins.len() as f64 / self.trade_history.len() as f64 * 100.0;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };

        kelly_fraction(
            win_rate,
            avg_win,
            avg_loss,
            self.config.max_position_size_pct / 100.0,
        )
    }
}

/// Half-Kelly bet sizing: f = (b*p - q) / b with b = avg_win / |avg_loss|,
/// halved for safety and clamped to [0, max_fraction]
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64, max_fraction: f64) -> f64 {
    if avg_loss == 0.0 {
        return 0.0;
    }

    let p = win_rate / 100.0;
    let q = 1.0 - p;
    let b = avg_win / avg_loss.abs();
    if b == 0.0 {
        return 0.0;
    }

    let kelly = (b * p - q) / b;
    (kelly / 2.0).clamp(0.0, max_fraction)
}

/// Largest peak-to-trough decline of the equity curve, in percent (>= 0)
fn max_drawdown_pct(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;

    for &value in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (peak - value) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

/// Annualized Sharpe ratio over per-snapshot percentage returns
fn sharpe_ratio(equity: &[f64]) -> f64 {
    if equity.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = equity
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();

    if returns.len() < 2 {
        return 0.0;
    }

    let mean = Statistics::mean(&returns);
    let std_dev = Statistics::std_dev(&returns);
    if std_dev == 0.0 || std_dev.is_nan() {
        return 0.0;
    }

    (mean / std_dev) * TRADING_DAYS_PER_YEAR.sqrt()
}
