//! Trade persistence and strategy configuration
//!
//! SQLite-backed store for the executed-trade audit trail and the
//! user-managed strategy roster. A persistence failure never aborts a scan
//! tick; the in-memory engine state stays authoritative for the run.

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Row recorded for every executed order
#[derive(Debug, Clone)]
pub struct TradeRow {
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: u32,
    pub price: f64,
    /// "EXECUTED" on entries, "EXTERNAL_CLOSED" on exits
    pub status: String,
    pub strategy_id: Option<i64>,
    pub pnl: Option<f64>,
}

/// Port consumed by the scanner for trade records and the active-strategy
/// roster
pub trait TradeStore: Send + Sync {
    fn record_trade(&self, trade: &TradeRow) -> Result<()>;

    /// External names of the strategies the user has switched on
    fn load_active_strategy_names(&self) -> Result<Vec<String>>;
}

pub struct SqliteTradeStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTradeStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL mode for concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        info!("Trade store initialized: {}", db_path.display());

        Ok(store)
    }

    /// In-memory store for tests and ephemeral simulation runs
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price REAL NOT NULL,
                status TEXT NOT NULL,
                strategy_id INTEGER,
                pnl REAL,
                timestamp TEXT DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS strategies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                parameters TEXT DEFAULT '{}',
                is_active INTEGER DEFAULT 1
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            [],
        )?;

        debug!("Database schema created/verified");
        Ok(())
    }

    /// Insert or update a strategy row and its active flag
    pub fn upsert_strategy(&self, name: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO strategies (name, is_active) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET is_active = ?2",
            params![name, active as i32],
        )?;
        Ok(())
    }

    pub fn trade_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM trades", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl TradeStore for SqliteTradeStore {
    fn record_trade(&self, trade: &TradeRow) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO trades (user_id, symbol, side, quantity, price, status, strategy_id, pnl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                trade.user_id,
                trade.symbol,
                trade.side,
                trade.quantity,
                trade.price,
                trade.status,
                trade.strategy_id,
                trade.pnl,
            ],
        )?;

        debug!(
            "Trade recorded: {} {} qty={} @ {:.2} [{}]",
            trade.side, trade.symbol, trade.quantity, trade.price, trade.status
        );

        Ok(())
    }

    fn load_active_strategy_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name FROM strategies WHERE is_active = 1")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(symbol: &str, status: &str) -> TradeRow {
        TradeRow {
            user_id: "auto_scanner".to_string(),
            symbol: symbol.to_string(),
            side: "BUY".to_string(),
            quantity: 10,
            price: 100.0,
            status: status.to_string(),
            strategy_id: None,
            pnl: Some(0.0),
        }
    }

    #[test]
    fn test_record_and_count_trades() {
        let store = SqliteTradeStore::in_memory().unwrap();
        store.record_trade(&trade("RELIANCE", "EXECUTED")).unwrap();
        store.record_trade(&trade("RELIANCE", "EXTERNAL_CLOSED")).unwrap();
        assert_eq!(store.trade_count().unwrap(), 2);
    }

    #[test]
    fn test_active_strategy_roster() {
        let store = SqliteTradeStore::in_memory().unwrap();
        assert!(store.load_active_strategy_names().unwrap().is_empty());

        store.upsert_strategy("RSI Mean Reversion", true).unwrap();
        store.upsert_strategy("MACD Strategy", true).unwrap();
        store.upsert_strategy("VWAP", false).unwrap();

        let mut names = store.load_active_strategy_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["MACD Strategy", "RSI Mean Reversion"]);

        // Toggling off removes it from the roster
        store.upsert_strategy("MACD Strategy", false).unwrap();
        assert_eq!(
            store.load_active_strategy_names().unwrap(),
            vec!["RSI Mean Reversion"]
        );
    }
}
