//! Integration tests for the scan pipeline
//!
//! Drive the scanner tick-by-tick through scripted market data and recording
//! ports, and verify the ordering and risk invariants end to end.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use equity_engine::config::Config;
use equity_engine::data::MarketData;
use equity_engine::engine::{EngineMode, MarketScanner};
use equity_engine::exchange::OrderExecutor;
use equity_engine::indicators;
use equity_engine::persistence::{TradeRow, TradeStore};
use equity_engine::signals::SignalAction;
use equity_engine::types::{Candle, ExitReason, Side, Symbol};

// =============================================================================
// Test Ports
// =============================================================================

struct ScriptedMarketData {
    windows: HashMap<Symbol, Vec<Candle>>,
}

#[async_trait]
impl MarketData for ScriptedMarketData {
    async fn fetch(&self, symbol: &Symbol, _interval: &str, _limit: usize) -> anyhow::Result<Vec<Candle>> {
        Ok(self.windows.get(symbol).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct RecordingExecutor {
    orders: Mutex<Vec<(String, String, u32, f64)>>,
    fail: bool,
}

#[async_trait]
impl OrderExecutor for RecordingExecutor {
    async fn submit_order(
        &self,
        symbol: &Symbol,
        side: &str,
        quantity: u32,
        price: f64,
    ) -> anyhow::Result<()> {
        self.orders.lock().unwrap().push((
            symbol.as_str().to_string(),
            side.to_string(),
            quantity,
            price,
        ));
        if self.fail {
            anyhow::bail!("broker rejected order");
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryStore {
    trades: Mutex<Vec<TradeRow>>,
    active: Vec<String>,
}

impl TradeStore for MemoryStore {
    fn record_trade(&self, trade: &TradeRow) -> anyhow::Result<()> {
        self.trades.lock().unwrap().push(trade.clone());
        Ok(())
    }

    fn load_active_strategy_names(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.active.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    let start = Utc::now() - Duration::minutes(closes.len() as i64);
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Candle {
            datetime: start + Duration::minutes(i as i64),
            open: c,
            high: c + 5.0,
            low: c - 5.0,
            close: c,
            volume: 1000.0,
        })
        .collect()
}

/// 49 flat bars then a breakout: the 2/3-bar SMA crossover fires on the
/// final bar only
fn breakout_closes(base: f64, breakout: f64) -> Vec<f64> {
    let mut closes = vec![base; 49];
    closes.push(breakout);
    closes
}

fn test_config(symbols: &[&str]) -> Config {
    let mut config = Config::default();
    config.trading.symbols = symbols.iter().map(|s| s.to_string()).collect();
    config.indicators.sma_short = 2;
    config.indicators.sma_long = 3;
    config
}

struct Harness {
    scanner: Arc<MarketScanner>,
    executor: Arc<RecordingExecutor>,
    store: Arc<MemoryStore>,
}

fn harness(
    config: Config,
    windows: HashMap<Symbol, Vec<Candle>>,
    active: Vec<String>,
    fail_orders: bool,
) -> Harness {
    let market_data = Arc::new(ScriptedMarketData { windows });
    let executor = Arc::new(RecordingExecutor {
        orders: Mutex::new(Vec::new()),
        fail: fail_orders,
    });
    let store = Arc::new(MemoryStore {
        trades: Mutex::new(Vec::new()),
        active,
    });

    let scanner = Arc::new(MarketScanner::new(
        config,
        EngineMode::Simulation,
        market_data,
        executor.clone(),
        store.clone(),
    ));

    Harness {
        scanner,
        executor,
        store,
    }
}

fn ma_only() -> Vec<String> {
    vec!["Moving Average Crossover".to_string()]
}

// =============================================================================
// Scan Tick Tests
// =============================================================================

#[tokio::test]
async fn test_full_tick_executes_buy() {
    let symbol = Symbol::new("X");
    let candles = candles_from_closes(&breakout_closes(100.0, 116.0));

    // Expected sizing from the same window the scanner sees
    let high: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let low: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let close: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let atr = indicators::atr(&high, &low, &close, 14)
        .last()
        .copied()
        .flatten()
        .unwrap();
    let expected_qty = (100_000.0 * 0.02 / (2.0 * atr)).floor() as u32;

    let mut windows = HashMap::new();
    windows.insert(symbol.clone(), candles);
    let h = harness(test_config(&["X"]), windows, ma_only(), false);

    h.scanner.clone().scan_tick().await.unwrap();

    // Position opened with ATR-derived levels
    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    let position = money.position(&symbol).expect("position should be open");
    assert_eq!(position.side, Side::Long);
    assert_eq!(position.quantity, expected_qty);
    assert!((position.stop_loss - (116.0 - 2.0 * atr)).abs() < 1e-9);
    assert!((position.take_profit - (116.0 + 4.0 * atr)).abs() < 1e-9);
    assert!(
        (money.current_capital - (100_000.0 - expected_qty as f64 * 116.0)).abs() < 1e-9
    );
    drop(money);

    // One BUY order through the port
    let orders = h.executor.orders.lock().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1, "BUY");
    assert_eq!(orders[0].2, expected_qty);
    drop(orders);

    // One persisted trade and one signal event
    let trades = h.store.trades.lock().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, "EXECUTED");
    drop(trades);

    let signals = h.scanner.recent_signals(10, None);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].action, SignalAction::TradeExecuted);
    assert_eq!(signals[0].verdict, 1);
    assert_eq!(signals[0].confidence, 1.0);
    assert_eq!(signals[0].suggested_quantity, expected_qty);

    let status = h.scanner.status();
    assert_eq!(status.open_positions, 1);
    assert_eq!(status.scan_count, 1);
    assert_eq!(status.daily_trades, 1);
}

#[tokio::test]
async fn test_stop_loss_exit_consumes_the_tick() {
    let symbol = Symbol::new("X");
    // Breakout shape that would fire a BUY, but the price sits below the
    // preloaded stop: the exit must win and no entry may follow
    let candles = candles_from_closes(&breakout_closes(80.0, 89.0));

    let mut windows = HashMap::new();
    windows.insert(symbol.clone(), candles);
    let h = harness(test_config(&["X"]), windows, ma_only(), false);

    h.scanner
        .money_manager()
        .lock()
        .unwrap()
        .open_position(&symbol, Side::Long, 100, 100.0, 5.0)
        .unwrap();

    h.scanner.clone().scan_tick().await.unwrap();

    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    assert!(!money.has_position(&symbol));
    // Round trip: 100,000 - 10,000 at open + 8,900 at close
    assert!((money.current_capital - 98_900.0).abs() < 1e-9);
    assert!((money.daily_pnl - (-1_100.0)).abs() < 1e-9);
    assert_eq!(money.trade_history().len(), 1);
    assert_eq!(money.trade_history()[0].exit_reason, ExitReason::StopLoss);
    assert_eq!(money.equity_curve().len(), 2);
    drop(money);

    // Closing SELL order, nothing else
    let orders = h.executor.orders.lock().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].1, "SELL");
    assert_eq!(orders[0].2, 100);
    drop(orders);

    let trades = h.store.trades.lock().unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, "EXTERNAL_CLOSED");
    assert_eq!(trades[0].pnl, Some(-1_100.0));
    drop(trades);

    let signals = h.scanner.recent_signals(10, None);
    assert_eq!(signals.len(), 1);
    assert_eq!(
        signals[0].action,
        SignalAction::PositionClosed(ExitReason::StopLoss)
    );
}

#[tokio::test]
async fn test_daily_loss_gate_blocks_entry() {
    let symbol = Symbol::new("X");
    let candles = candles_from_closes(&breakout_closes(100.0, 116.0));

    let mut windows = HashMap::new();
    windows.insert(symbol.clone(), candles);
    let h = harness(test_config(&["X"]), windows, ma_only(), false);

    h.scanner.money_manager().lock().unwrap().daily_pnl = -5_001.0;

    h.scanner.clone().scan_tick().await.unwrap();

    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    assert!(!money.has_position(&symbol));
    assert!((money.current_capital - 100_000.0).abs() < 1e-9);
    drop(money);

    assert!(h.executor.orders.lock().unwrap().is_empty());
    assert!(h.store.trades.lock().unwrap().is_empty());

    let signals = h.scanner.recent_signals(10, None);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].action.to_string(), "BLOCKED(DAILY_LOSS_LIMIT)");
    assert_eq!(signals[0].verdict, 1);
}

#[tokio::test]
async fn test_order_failure_leaves_state_untouched() {
    let symbol = Symbol::new("X");
    let candles = candles_from_closes(&breakout_closes(100.0, 116.0));

    let mut windows = HashMap::new();
    windows.insert(symbol.clone(), candles);
    let h = harness(test_config(&["X"]), windows, ma_only(), true);

    h.scanner.clone().scan_tick().await.unwrap();

    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    assert!(!money.has_position(&symbol));
    assert!((money.current_capital - 100_000.0).abs() < 1e-9);
    assert_eq!(money.daily_trades, 0);
    drop(money);

    // The order was attempted but nothing was persisted
    assert_eq!(h.executor.orders.lock().unwrap().len(), 1);
    assert!(h.store.trades.lock().unwrap().is_empty());

    let signals = h.scanner.recent_signals(10, None);
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].action, SignalAction::ExecutionFailed);
}

#[tokio::test]
async fn test_one_signal_per_symbol_and_short_windows_skipped() {
    let buy = Symbol::new("X");
    let short = Symbol::new("Y");
    let flat = Symbol::new("Z");

    let mut windows = HashMap::new();
    windows.insert(buy.clone(), candles_from_closes(&breakout_closes(100.0, 116.0)));
    windows.insert(short.clone(), candles_from_closes(&[100.0; 10]));
    windows.insert(flat.clone(), candles_from_closes(&[100.0; 50]));

    let h = harness(test_config(&["X", "Y", "Z"]), windows, ma_only(), false);

    h.scanner.clone().scan_tick().await.unwrap();

    // Exactly one event each for X and Z; Y had too few bars
    let signals = h.scanner.recent_signals(10, None);
    assert_eq!(signals.len(), 2);
    assert!(signals.iter().all(|s| s.symbol != short));
    assert_eq!(h.scanner.recent_signals(10, Some(&buy)).len(), 1);

    let flat_signals = h.scanner.recent_signals(10, Some(&flat));
    assert_eq!(flat_signals.len(), 1);
    assert_eq!(flat_signals[0].action, SignalAction::Hold);
    assert_eq!(flat_signals[0].verdict, 0);

    // Only the breakout symbol has a position
    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    assert_eq!(money.open_position_count(), 1);
    assert!(money.has_position(&buy));
}

#[tokio::test]
async fn test_sequential_ticks_open_then_exit() {
    let symbol = Symbol::new("X");
    let mut windows = HashMap::new();
    windows.insert(symbol.clone(), candles_from_closes(&breakout_closes(100.0, 116.0)));

    let h = harness(test_config(&["X"]), windows, ma_only(), false);

    // Tick 1 opens
    h.scanner.clone().scan_tick().await.unwrap();
    assert!(h.scanner.money_manager().lock().unwrap().has_position(&symbol));

    // Tick 2 replays the same window: the vote fires again, but the open
    // position forces the defensive ALREADY_IN_POSITION outcome and no
    // second order leaves the engine
    h.scanner.clone().scan_tick().await.unwrap();
    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    assert_eq!(money.open_position_count(), 1);
    assert_eq!(money.daily_trades, 1);
    drop(money);

    assert_eq!(h.executor.orders.lock().unwrap().len(), 1);

    let signals = h.scanner.recent_signals(10, None);
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[0].action, SignalAction::AlreadyInPosition);
    assert_eq!(h.scanner.status().scan_count, 2);
}

#[tokio::test]
async fn test_shutdown_closes_all_positions() {
    let a = Symbol::new("A");
    let b = Symbol::new("B");

    let mut windows = HashMap::new();
    windows.insert(a.clone(), candles_from_closes(&[105.0; 50]));
    windows.insert(b.clone(), candles_from_closes(&[95.0; 50]));

    let h = harness(test_config(&["A", "B"]), windows, ma_only(), false);

    {
        let money = h.scanner.money_manager();
        let mut money = money.lock().unwrap();
        money.open_position(&a, Side::Long, 10, 100.0, 5.0).unwrap();
        money.open_position(&b, Side::Short, 20, 100.0, 5.0).unwrap();
    }

    h.scanner.shutdown().await;

    let money = h.scanner.money_manager();
    let money = money.lock().unwrap();
    assert_eq!(money.open_position_count(), 0);
    assert_eq!(money.trade_history().len(), 2);
    assert!(money
        .trade_history()
        .iter()
        .all(|t| t.exit_reason == ExitReason::EngineStop));
    drop(money);

    let trades = h.store.trades.lock().unwrap();
    assert_eq!(trades.len(), 2);
    assert!(trades.iter().all(|t| t.status == "EXTERNAL_CLOSED"));
    drop(trades);

    // One best-effort closing order per position, on the opposite side
    let orders = h.executor.orders.lock().unwrap();
    assert_eq!(orders.len(), 2);
    let sides: Vec<&str> = orders.iter().map(|o| o.1.as_str()).collect();
    assert!(sides.contains(&"SELL") && sides.contains(&"BUY"));
}

#[tokio::test]
async fn test_status_reflects_configuration() {
    let symbol = Symbol::new("X");
    let mut windows = HashMap::new();
    windows.insert(symbol, candles_from_closes(&[100.0; 50]));

    // Empty roster in the store activates every registry strategy
    let h = harness(test_config(&["X"]), windows, Vec::new(), false);
    h.scanner.clone().scan_tick().await.unwrap();

    let status = h.scanner.status();
    assert!(!status.running);
    assert_eq!(status.mode, EngineMode::Simulation);
    assert_eq!(status.active_strategies.len(), 8);
    assert_eq!(status.scan_count, 1);
    assert!(status.last_scan_time.is_some());
    assert_eq!(status.signals_in_memory, 1);
    assert!((status.current_capital - 100_000.0).abs() < 1e-9);

    let metrics = h.scanner.risk_metrics();
    assert_eq!(metrics.win_rate, 0.0);
    assert_eq!(metrics.daily_trades, 0);
}
