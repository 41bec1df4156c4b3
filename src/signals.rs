//! Signal events and the bounded in-memory signal log

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::risk::TradeBlock;
use crate::types::{ExitReason, Symbol};

/// Default number of signal events retained in memory
pub const SIGNAL_LOG_CAPACITY: usize = 500;

/// What the scanner did with a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Hold,
    PositionClosed(ExitReason),
    Blocked(TradeBlock),
    AlreadyInPosition,
    TradeExecuted,
    ExecutionFailed,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalAction::Hold => write!(f, "HOLD"),
            SignalAction::PositionClosed(reason) => write!(f, "POSITION_CLOSED({})", reason),
            SignalAction::Blocked(reason) => write!(f, "BLOCKED({})", reason),
            SignalAction::AlreadyInPosition => write!(f, "ALREADY_IN_POSITION"),
            SignalAction::TradeExecuted => write!(f, "TRADE_EXECUTED"),
            SignalAction::ExecutionFailed => write!(f, "EXECUTION_FAILED"),
        }
    }
}

impl Serialize for SignalAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One scanner decision for one symbol on one tick
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub verdict: i8,
    pub verdict_label: &'static str,
    pub current_price: f64,
    /// Per-strategy verdicts keyed by registry key
    pub strategy_verdicts: BTreeMap<&'static str, i8>,
    pub confidence: f64,
    pub suggested_quantity: u32,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub action: SignalAction,
}

/// Bounded FIFO ring of recent signal events
pub struct SignalLog {
    events: VecDeque<SignalEvent>,
    capacity: usize,
}

impl SignalLog {
    pub fn new(capacity: usize) -> Self {
        SignalLog {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: SignalEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Most recent events, newest first, optionally filtered by symbol
    pub fn recent(&self, limit: usize, symbol: Option<&Symbol>) -> Vec<SignalEvent> {
        self.events
            .iter()
            .rev()
            .filter(|e| symbol.map_or(true, |s| &e.symbol == s))
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for SignalLog {
    fn default() -> Self {
        SignalLog::new(SIGNAL_LOG_CAPACITY)
    }
}
