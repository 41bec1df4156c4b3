//! Market scanner
//!
//! The single periodic task driving the whole pipeline: fetch windows for
//! every watchlist symbol in parallel, evaluate exits before entries, route
//! orders through the execution port, and append one signal event per symbol
//! per tick. The money manager is the only shared mutable state; its lock is
//! never held across an await point.

use chrono::{DateTime, Datelike, Local, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::data::MarketData;
use crate::exchange::OrderExecutor;
use crate::indicators;
use crate::persistence::{TradeRow, TradeStore};
use crate::risk::{MoneyManager, RiskMetrics};
use crate::signals::{SignalAction, SignalEvent, SignalLog};
use crate::strategy::Verdict;
use crate::types::{ExitReason, Side, Symbol, Window};
use crate::voting::{map_strategy_names, Vote, VotingEngine, STRATEGY_KEYS};

/// Shortest window the strategies are evaluated on
const MIN_WINDOW_BARS: usize = 50;

/// Sleep while the market is closed
const MARKET_CLOSED_PAUSE: Duration = Duration::from_secs(60);

/// Back-off after a failed tick
const ERROR_PAUSE: Duration = Duration::from_secs(10);

/// Where orders and market data come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineMode {
    Live,
    Simulation,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineMode::Live => write!(f, "LIVE"),
            EngineMode::Simulation => write!(f, "SIMULATION"),
        }
    }
}

/// Snapshot served to the API layer
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub market_hours: bool,
    pub mode: EngineMode,
    pub active_strategies: Vec<String>,
    pub open_positions: usize,
    pub daily_trades: u32,
    pub daily_pnl: f64,
    pub current_capital: f64,
    pub scan_count: u64,
    pub last_scan_time: Option<DateTime<Utc>>,
    pub signals_in_memory: usize,
}

/// True on weekdays between the configured session open and close, inclusive
pub fn is_market_open_at(
    now: DateTime<Local>,
    open: chrono::NaiveTime,
    close: chrono::NaiveTime,
) -> bool {
    let weekday = now.weekday().number_from_monday();
    if weekday > 5 {
        return false;
    }
    let time = now.time();
    time >= open && time <= close
}

/// The periodic scanner over the watchlist
pub struct MarketScanner {
    config: Config,
    mode: EngineMode,
    watchlist: Vec<Symbol>,
    voting: VotingEngine,
    money: Arc<Mutex<MoneyManager>>,
    market_data: Arc<dyn MarketData>,
    executor: Arc<dyn OrderExecutor>,
    store: Arc<dyn TradeStore>,
    signals: Mutex<SignalLog>,
    active_keys: RwLock<Vec<&'static str>>,
    running: AtomicBool,
    scan_count: AtomicU64,
    last_scan: Mutex<Option<DateTime<Utc>>>,
}

impl MarketScanner {
    pub fn new(
        config: Config,
        mode: EngineMode,
        market_data: Arc<dyn MarketData>,
        executor: Arc<dyn OrderExecutor>,
        store: Arc<dyn TradeStore>,
    ) -> Self {
        let watchlist = config.trading.symbols();
        let voting = VotingEngine::new(&config.indicators);
        let money = MoneyManager::new(config.trading.initial_capital, config.risk.clone());

        MarketScanner {
            config,
            mode,
            watchlist,
            voting,
            money: Arc::new(Mutex::new(money)),
            market_data,
            executor,
            store,
            signals: Mutex::new(SignalLog::default()),
            active_keys: RwLock::new(STRATEGY_KEYS.to_vec()),
            running: AtomicBool::new(false),
            scan_count: AtomicU64::new(0),
            last_scan: Mutex::new(None),
        }
    }

    fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.config.broker.request_timeout_secs)
    }

    fn is_market_open(&self) -> bool {
        is_market_open_at(
            Local::now(),
            self.config.trading.market_open,
            self.config.trading.market_close,
        )
    }

    /// Request a cooperative stop; observed at the next tick boundary
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Main scan loop. Runs until [`stop`](Self::stop), then closes every
    /// open position.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!(
            "Scanner started: mode={} symbols={} interval={}s",
            self.mode,
            self.watchlist.len(),
            self.config.trading.scan_interval_secs
        );

        while self.running.load(Ordering::SeqCst) {
            if !self.is_market_open() {
                debug!("Outside market hours, pausing");
                sleep(MARKET_CLOSED_PAUSE).await;
                continue;
            }

            if let Err(e) = self.clone().scan_tick().await {
                error!("Scan tick failed: {:#}", e);
                sleep(ERROR_PAUSE).await;
                continue;
            }

            sleep(Duration::from_secs(self.config.trading.scan_interval_secs)).await;
        }

        self.shutdown().await;
        info!("Scanner stopped");
    }

    /// One pass over the watchlist: reload the strategy roster, process every
    /// symbol in parallel, then stamp the tick counters.
    pub async fn scan_tick(self: Arc<Self>) -> anyhow::Result<()> {
        self.reload_active_strategies();

        let mut tasks = JoinSet::new();
        for symbol in self.watchlist.clone() {
            tasks.spawn(Self::process_symbol(self.clone(), symbol));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Symbol task aborted: {}", e);
            }
        }

        let count = self.scan_count.fetch_add(1, Ordering::Relaxed) + 1;
        *self.last_scan.lock().unwrap() = Some(Utc::now());
        debug!("Scan {} complete", count);
        Ok(())
    }

    /// Refresh the active strategy keys from the configuration backend.
    ///
    /// An empty or unmappable roster means every registry strategy is active;
    /// a load failure keeps the previous roster.
    fn reload_active_strategies(&self) {
        match self.store.load_active_strategy_names() {
            Ok(names) => {
                let mapped = map_strategy_names(&names);
                let keys = if mapped.is_empty() {
                    STRATEGY_KEYS.to_vec()
                } else {
                    mapped
                };
                *self.active_keys.write().unwrap() = keys;
            }
            Err(e) => {
                error!("Failed to load active strategies: {:#}", e);
            }
        }
    }

    /// Full per-symbol pipeline: fetch, exit check, entry decision, signal.
    ///
    /// Exit and entry never both happen for one symbol in one tick.
    async fn process_symbol(self: Arc<Self>, symbol: Symbol) {
        let candles = match timeout(
            self.io_timeout(),
            self.market_data.fetch(
                &symbol,
                &self.config.trading.candle_interval,
                self.config.trading.candle_limit,
            ),
        )
        .await
        {
            Err(_) => {
                warn!("Market data timed out for {}", symbol);
                return;
            }
            Ok(Err(e)) => {
                warn!("Market data fetch failed for {}: {:#}", symbol, e);
                return;
            }
            Ok(Ok(candles)) => candles,
        };

        if candles.len() < MIN_WINDOW_BARS {
            debug!(
                "Skipping {}: only {} bars (need {})",
                symbol,
                candles.len(),
                MIN_WINDOW_BARS
            );
            return;
        }

        let window = Window::from_candles(&candles);
        let Some(current_price) = window.last_close() else {
            return;
        };
        let current_atr = indicators::atr(
            &window.high,
            &window.low,
            &window.close,
            self.config.indicators.atr_period,
        )
        .last()
        .copied()
        .flatten()
        .unwrap_or(current_price * 0.02);

        // Exit phase: an exit consumes the symbol's tick
        let closed = {
            let mut money = self.money.lock().unwrap();
            match money.should_exit(&symbol, current_price) {
                Some(reason) => money.position(&symbol).cloned().map(|position| {
                    let pnl = money
                        .close_position(&symbol, current_price, reason)
                        .unwrap_or(0.0);
                    (position, reason, pnl)
                }),
                None => None,
            }
        };

        if let Some((position, reason, pnl)) = closed {
            let closing_side = position.side.exit_order();
            match timeout(
                self.io_timeout(),
                self.executor
                    .submit_order(&symbol, closing_side, position.quantity, current_price),
            )
            .await
            {
                Err(_) => warn!("Closing order timed out for {}", symbol),
                Ok(Err(e)) => warn!("Closing order failed for {}: {:#}", symbol, e),
                Ok(Ok(())) => {}
            }

            self.persist_trade(
                &symbol,
                closing_side,
                position.quantity,
                current_price,
                "EXTERNAL_CLOSED",
                Some(pnl),
            );

            self.push_signal(SignalEvent {
                timestamp: Utc::now(),
                symbol,
                verdict: 0,
                verdict_label: Verdict::Hold.label(),
                current_price,
                strategy_verdicts: BTreeMap::new(),
                confidence: 0.0,
                suggested_quantity: position.quantity,
                stop_loss: position.stop_loss,
                take_profit: position.take_profit,
                action: SignalAction::PositionClosed(reason),
            });
            return;
        }

        // Entry phase
        let active = self.active_keys.read().unwrap().clone();
        let vote = self.voting.evaluate(&window, &active);

        let suggested_quantity = {
            let money = self.money.lock().unwrap();
            money.calculate_position_size(current_price, current_atr)
        };
        let (stop_loss, take_profit) = match vote.combined {
            Verdict::Sell => (
                current_price + 2.0 * current_atr,
                current_price - 4.0 * current_atr,
            ),
            _ => (
                current_price - 2.0 * current_atr,
                current_price + 4.0 * current_atr,
            ),
        };

        let action = match vote.combined {
            Verdict::Hold => SignalAction::Hold,
            verdict => {
                self.attempt_entry(&symbol, verdict, suggested_quantity, current_price, current_atr)
                    .await
            }
        };

        self.push_signal(self.build_signal(
            symbol,
            &vote,
            current_price,
            suggested_quantity,
            stop_loss,
            take_profit,
            action,
        ));
    }

    /// Entry decision once the vote is directional: risk gates, then order
    /// submission, then position bookkeeping. State is only mutated after the
    /// order succeeds.
    async fn attempt_entry(
        &self,
        symbol: &Symbol,
        verdict: Verdict,
        quantity: u32,
        price: f64,
        atr: f64,
    ) -> SignalAction {
        let gate = self.money.lock().unwrap().can_trade();
        if let Err(block) = gate {
            debug!("Entry blocked for {}: {}", symbol, block);
            return SignalAction::Blocked(block);
        }

        if self.money.lock().unwrap().has_position(symbol) {
            return SignalAction::AlreadyInPosition;
        }

        if quantity == 0 {
            warn!("No affordable position size for {} at {:.2}", symbol, price);
            return SignalAction::ExecutionFailed;
        }

        let side = match verdict {
            Verdict::Buy => Side::Long,
            _ => Side::Short,
        };
        let order_side = side.entry_order();

        let submitted = match timeout(
            self.io_timeout(),
            self.executor.submit_order(symbol, order_side, quantity, price),
        )
        .await
        {
            Err(_) => {
                warn!("Order timed out for {}", symbol);
                false
            }
            Ok(Err(e)) => {
                warn!("Order failed for {}: {:#}", symbol, e);
                false
            }
            Ok(Ok(())) => true,
        };

        if !submitted {
            return SignalAction::ExecutionFailed;
        }

        let opened = self
            .money
            .lock()
            .unwrap()
            .open_position(symbol, side, quantity, price, atr);

        match opened {
            Ok(_) => {
                self.persist_trade(symbol, order_side, quantity, price, "EXECUTED", None);
                SignalAction::TradeExecuted
            }
            Err(e) => {
                // Programming error; abort the symbol's tick, keep the loop alive
                error!("Invariant violation opening {}: {}", symbol, e);
                SignalAction::AlreadyInPosition
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_signal(
        &self,
        symbol: Symbol,
        vote: &Vote,
        current_price: f64,
        suggested_quantity: u32,
        stop_loss: f64,
        take_profit: f64,
        action: SignalAction,
    ) -> SignalEvent {
        SignalEvent {
            timestamp: Utc::now(),
            symbol,
            verdict: vote.combined.as_i8(),
            verdict_label: vote.combined.label(),
            current_price,
            strategy_verdicts: vote
                .signals
                .iter()
                .map(|(k, v)| (*k, v.as_i8()))
                .collect(),
            confidence: vote.confidence(),
            suggested_quantity,
            stop_loss,
            take_profit,
            action,
        }
    }

    fn push_signal(&self, event: SignalEvent) {
        debug!(
            "Signal {} {} @ {:.2} -> {}",
            event.symbol, event.verdict_label, event.current_price, event.action
        );
        self.signals.lock().unwrap().push(event);
    }

    fn persist_trade(
        &self,
        symbol: &Symbol,
        side: &str,
        quantity: u32,
        price: f64,
        status: &str,
        pnl: Option<f64>,
    ) {
        let row = TradeRow {
            user_id: self.config.trading.user_id.clone(),
            symbol: symbol.as_str().to_string(),
            side: side.to_string(),
            quantity,
            price,
            status: status.to_string(),
            strategy_id: None,
            pnl,
        };
        if let Err(e) = self.store.record_trade(&row) {
            // In-memory state stays authoritative; the tick continues
            error!("Failed to persist trade for {}: {:#}", symbol, e);
        }
    }

    /// Close every open position at the latest available price
    pub async fn shutdown(&self) {
        let symbols = { self.money.lock().unwrap().open_symbols() };
        if symbols.is_empty() {
            return;
        }

        info!("Engine stop: closing {} open position(s)", symbols.len());
        for symbol in symbols {
            let price = match timeout(
                self.io_timeout(),
                self.market_data.fetch(
                    &symbol,
                    &self.config.trading.candle_interval,
                    self.config.trading.candle_limit,
                ),
            )
            .await
            {
                Ok(Ok(candles)) if !candles.is_empty() => candles[candles.len() - 1].close,
                _ => {
                    warn!("No price for {} at shutdown, closing at entry", symbol);
                    match self.money.lock().unwrap().position(&symbol) {
                        Some(p) => p.entry_price,
                        None => continue,
                    }
                }
            };

            let closed = {
                let mut money = self.money.lock().unwrap();
                let Some(position) = money.position(&symbol).cloned() else {
                    continue;
                };
                let pnl = money
                    .close_position(&symbol, price, ExitReason::EngineStop)
                    .unwrap_or(0.0);
                (position, pnl)
            };

            let closing_side = closed.0.side.exit_order();
            match timeout(
                self.io_timeout(),
                self.executor
                    .submit_order(&symbol, closing_side, closed.0.quantity, price),
            )
            .await
            {
                Err(_) => warn!("Closing order timed out for {}", symbol),
                Ok(Err(e)) => warn!("Closing order failed for {}: {:#}", symbol, e),
                Ok(Ok(())) => {}
            }

            self.persist_trade(
                &symbol,
                closing_side,
                closed.0.quantity,
                price,
                "EXTERNAL_CLOSED",
                Some(closed.1),
            );
        }
    }

    // -------------------------------------------------------------------------
    // Read surface for the API layer
    // -------------------------------------------------------------------------

    pub fn status(&self) -> EngineStatus {
        let money = self.money.lock().unwrap();
        EngineStatus {
            running: self.is_running(),
            market_hours: self.is_market_open(),
            mode: self.mode,
            active_strategies: self
                .active_keys
                .read()
                .unwrap()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            open_positions: money.open_position_count(),
            daily_trades: money.daily_trades,
            daily_pnl: money.daily_pnl,
            current_capital: money.current_capital,
            scan_count: self.scan_count.load(Ordering::Relaxed),
            last_scan_time: *self.last_scan.lock().unwrap(),
            signals_in_memory: self.signals.lock().unwrap().len(),
        }
    }

    pub fn recent_signals(&self, limit: usize, symbol: Option<&Symbol>) -> Vec<SignalEvent> {
        self.signals.lock().unwrap().recent(limit, symbol)
    }

    pub fn risk_metrics(&self) -> RiskMetrics {
        self.money.lock().unwrap().get_risk_metrics()
    }

    /// Shared money manager handle, used by the read surface and tests
    pub fn money_manager(&self) -> Arc<Mutex<MoneyManager>> {
        self.money.clone()
    }
}
