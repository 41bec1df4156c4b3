//! Backtesting engine
//!
//! Replays historical candles through the same voting engine and money
//! manager the live scanner uses, bar by bar with exits evaluated before
//! entries. Fills are frictionless at the close; the value of a backtest here
//! is strategy-mix comparison, not execution modeling.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::Config;
use crate::indicators;
use crate::risk::{MoneyManager, RiskMetrics};
use crate::strategy::Verdict;
use crate::types::{Candle, ExitReason, Side, Symbol, Window};
use crate::voting::VotingEngine;

/// Bars consumed before the first trading decision
const WARMUP_BARS: usize = 50;

#[derive(Debug, Serialize)]
pub struct BacktestResult {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return_pct: f64,
    pub total_trades: usize,
    pub suggested_kelly_fraction: f64,
    pub metrics: RiskMetrics,
}

pub struct Backtester {
    config: Config,
    voting: VotingEngine,
    active_keys: Vec<&'static str>,
}

impl Backtester {
    pub fn new(config: Config, active_keys: Vec<&'static str>) -> Self {
        let voting = VotingEngine::new(&config.indicators);
        Backtester {
            config,
            voting,
            active_keys,
        }
    }

    /// Replay the data set and return the session metrics
    pub fn run(&self, data: &HashMap<Symbol, Vec<Candle>>) -> BacktestResult {
        let mut money = MoneyManager::new(
            self.config.trading.initial_capital,
            self.config.risk.clone(),
        );

        let bar_count = data.values().map(|c| c.len()).min().unwrap_or(0);
        let mut last_seen_date = None;

        for i in WARMUP_BARS.saturating_sub(1)..bar_count {
            for (symbol, candles) in data {
                let bars = &candles[..=i];
                let bar_date = bars[i].datetime.date_naive();

                // Candle timestamps drive the daily limits, not the wall clock
                if last_seen_date.is_some_and(|d| bar_date > d) {
                    money.daily_pnl = 0.0;
                    money.daily_trades = 0;
                }
                last_seen_date = Some(bar_date);

                let window = Window::from_candles(bars);
                let Some(current_price) = window.last_close() else {
                    continue;
                };

                // Exits first; an exit consumes the symbol's bar
                if let Some(reason) = money.should_exit(symbol, current_price) {
                    money.close_position(symbol, current_price, reason);
                    continue;
                }

                let vote = self.voting.evaluate(&window, &self.active_keys);
                if vote.combined == Verdict::Hold
                    || money.has_position(symbol)
                    || money.can_trade().is_err()
                {
                    continue;
                }

                let atr = indicators::atr(
                    &window.high,
                    &window.low,
                    &window.close,
                    self.config.indicators.atr_period,
                )
                .last()
                .copied()
                .flatten()
                .unwrap_or(current_price * 0.02);

                let quantity = money.calculate_position_size(current_price, atr);
                if quantity == 0 {
                    continue;
                }

                let side = match vote.combined {
                    Verdict::Buy => Side::Long,
                    _ => Side::Short,
                };
                if let Err(e) = money.open_position(symbol, side, quantity, current_price, atr) {
                    debug!("Skipping entry for {}: {}", symbol, e);
                }
            }
        }

        // Mark-to-market close of whatever is still open
        for symbol in money.open_symbols() {
            if let Some(candles) = data.get(&symbol) {
                if let Some(last) = candles.get(bar_count.saturating_sub(1)) {
                    money.close_position(&symbol, last.close, ExitReason::External);
                }
            }
        }

        let metrics = money.get_risk_metrics();
        let result = BacktestResult {
            initial_capital: money.initial_capital,
            final_capital: money.current_capital,
            total_return_pct: (money.current_capital - money.initial_capital)
                / money.initial_capital
                * 100.0,
            total_trades: money.trade_history().len(),
            suggested_kelly_fraction: money.kelly_fraction(),
            metrics,
        };

        info!(
            "Backtest complete: {} trades, return {:.2}%, win rate {:.1}%, kelly {:.3}",
            result.total_trades,
            result.total_return_pct,
            result.metrics.win_rate,
            result.suggested_kelly_fraction
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        // Fixed session start keeps every bar inside one trading day
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                datetime: start + Duration::minutes(i as i64),
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 1000.0,
            })
            .collect()
    }

    fn crossover_config() -> Config {
        let mut config = Config::default();
        config.indicators.sma_short = 2;
        config.indicators.sma_long = 3;
        config
    }

    #[test]
    fn test_backtest_round_trip_conserves_capital() {
        // Flat warmup, a breakout bar that fires the fast crossover, then a
        // collapse through the stop
        let mut closes = vec![100.0; 50];
        closes.push(120.0);
        closes.extend([100.0, 100.0, 100.0]);

        let mut data = HashMap::new();
        data.insert(Symbol::new("X"), candles_from_closes(&closes));

        let backtester = Backtester::new(crossover_config(), vec!["ma_crossover"]);
        let result = backtester.run(&data);

        assert_eq!(result.total_trades, 1);
        assert!(result.final_capital < result.initial_capital);
        assert!(result.total_return_pct < 0.0);

        // Round-trip law: capital change equals realized PnL
        let pnl = result.final_capital - result.initial_capital;
        assert!((result.metrics.daily_pnl - pnl).abs() < 1e-9);
    }

    #[test]
    fn test_backtest_marks_open_position_at_end() {
        // Breakout on the final bars leaves a position that must be closed out
        let mut closes = vec![100.0; 50];
        closes.push(120.0);
        closes.push(121.0);

        let mut data = HashMap::new();
        data.insert(Symbol::new("X"), candles_from_closes(&closes));

        let backtester = Backtester::new(crossover_config(), vec!["ma_crossover"]);
        let result = backtester.run(&data);

        assert_eq!(result.total_trades, 1);
        let trade_pnl: f64 = result.final_capital - result.initial_capital;
        assert!(trade_pnl.abs() < result.initial_capital);
    }

    #[test]
    fn test_backtest_flat_data_never_trades() {
        let closes = vec![100.0; 80];
        let mut data = HashMap::new();
        data.insert(Symbol::new("X"), candles_from_closes(&closes));

        let backtester = Backtester::new(Config::default(), vec!["ma_crossover", "macd"]);
        let result = backtester.run(&data);

        assert_eq!(result.total_trades, 0);
        assert_eq!(result.final_capital, result.initial_capital);
        assert_eq!(result.metrics.profit_factor, 0.0);
    }
}
