//! SQLite persistence layer.
//!
//! Holds the four tables the engine needs to survive a restart:
//! - `symbols` (admin tunables plus the last published prices)
//! - `accounts` (one balance per user)
//! - `orders` (append-only, outcome written once)
//! - `price_samples` (raw ticks, kept until purged)
//!
//! Multi-row invariants (debit + order insert, outcome + credit) are written
//! through [`SqliteStore::with_transaction`] so they commit or roll back together.

use crate::types::{Account, Direction, Order, OrderStatus, Outcome, PriceSample, SymbolConfig, Trend};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const ORDER_COLUMNS: &str = "id, user_id, symbol_id, amount, direction, entry_price,
    manipulated_entry_price, exit_price, manipulated_exit_price, duration, payout_percent,
    outcome, profit_loss, created_at, expires_at, resolved_at";

const SYMBOL_COLUMNS: &str = "id, name, ticker, trend, volatility, bias, manipulation_percentage,
    min_amount, max_amount, payout_percent, enabled, reference_price, manipulated_price,
    price_updated_at, created_at, updated_at";

/// SQLite store for symbols, accounts, orders and price ticks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied
        // transaction behind (it rolls back on drop), so the guard is reusable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS symbols (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                ticker TEXT NOT NULL,
                trend TEXT NOT NULL DEFAULT 'sideways',
                volatility REAL NOT NULL DEFAULT 0,
                bias REAL NOT NULL DEFAULT 0,
                manipulation_percentage REAL NOT NULL DEFAULT 0,
                min_amount REAL NOT NULL,
                max_amount REAL NOT NULL,
                payout_percent REAL NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                reference_price REAL NOT NULL DEFAULT 0,
                manipulated_price REAL NOT NULL DEFAULT 0,
                price_updated_at INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS accounts (
                user_id TEXT PRIMARY KEY,
                balance REAL NOT NULL CHECK (balance >= 0),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol_id INTEGER NOT NULL,
                amount REAL NOT NULL,
                direction TEXT NOT NULL,
                entry_price REAL NOT NULL,
                manipulated_entry_price REAL NOT NULL,
                exit_price REAL,
                manipulated_exit_price REAL,
                duration INTEGER NOT NULL,
                payout_percent REAL NOT NULL,
                outcome TEXT,
                profit_loss REAL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                resolved_at INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_orders_open_expiry ON orders(outcome, expires_at);
            CREATE INDEX IF NOT EXISTS idx_orders_symbol ON orders(symbol_id);

            CREATE TABLE IF NOT EXISTS price_samples (
                symbol_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                price REAL NOT NULL,
                volume REAL NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_samples_symbol_time
                ON price_samples(symbol_id, timestamp);",
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    /// Run `f` inside one transaction; commits on `Ok`, rolls back on `Err`.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<rusqlite::Error>,
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // ========== Symbol Methods ==========

    /// Insert a symbol and return its assigned id.
    pub fn insert_symbol(&self, symbol: &SymbolConfig) -> Result<i64, rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO symbols (name, ticker, trend, volatility, bias, manipulation_percentage,
                min_amount, max_amount, payout_percent, enabled, reference_price,
                manipulated_price, price_updated_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                symbol.name,
                symbol.ticker,
                symbol.trend.as_str(),
                symbol.volatility,
                symbol.bias,
                symbol.manipulation_percentage,
                symbol.min_amount,
                symbol.max_amount,
                symbol.payout_percent,
                symbol.enabled,
                symbol.reference_price,
                symbol.manipulated_price,
                symbol.price_updated_at,
                symbol.created_at,
                symbol.updated_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Inserted symbol {} ({})", id, symbol.name);
        Ok(id)
    }

    /// Persist admin-editable fields of a symbol.
    pub fn update_symbol(&self, symbol: &SymbolConfig) -> Result<(), rusqlite::Error> {
        let conn = self.conn();
        conn.execute(
            "UPDATE symbols SET name = ?2, ticker = ?3, trend = ?4, volatility = ?5, bias = ?6,
                manipulation_percentage = ?7, min_amount = ?8, max_amount = ?9,
                payout_percent = ?10, enabled = ?11, updated_at = ?12
             WHERE id = ?1",
            params![
                symbol.id,
                symbol.name,
                symbol.ticker,
                symbol.trend.as_str(),
                symbol.volatility,
                symbol.bias,
                symbol.manipulation_percentage,
                symbol.min_amount,
                symbol.max_amount,
                symbol.payout_percent,
                symbol.enabled,
                symbol.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Delete a symbol row. Returns whether a row was removed.
    pub fn delete_symbol(&self, id: i64) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let removed = conn.execute("DELETE FROM symbols WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    /// Get a symbol by id.
    pub fn get_symbol(&self, id: i64) -> Result<Option<SymbolConfig>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {} FROM symbols WHERE id = ?1", SYMBOL_COLUMNS),
            params![id],
            symbol_from_row,
        )
        .optional()
    }

    /// All symbols ordered by id.
    pub fn list_symbols(&self) -> Result<Vec<SymbolConfig>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {} FROM symbols ORDER BY id", SYMBOL_COLUMNS))?;
        let rows = stmt.query_map([], symbol_from_row)?;
        rows.collect()
    }

    /// Append a tick and persist the live prices it produced, atomically.
    pub fn record_tick(
        &self,
        sample: &PriceSample,
        reference_price: f64,
        manipulated_price: f64,
        updated_at_ms: i64,
    ) -> Result<(), rusqlite::Error> {
        self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO price_samples (symbol_id, timestamp, price, volume)
                 VALUES (?1, ?2, ?3, ?4)",
                params![sample.symbol_id, sample.timestamp, sample.price, sample.volume],
            )?;
            tx.execute(
                "UPDATE symbols SET reference_price = ?2, manipulated_price = ?3,
                    price_updated_at = ?4
                 WHERE id = ?1",
                params![sample.symbol_id, reference_price, manipulated_price, updated_at_ms],
            )?;
            Ok::<(), rusqlite::Error>(())
        })
    }

    // ========== Price Sample Methods ==========

    /// Append raw ticks (used for imports and tests).
    pub fn insert_samples(&self, samples: &[PriceSample]) -> Result<(), rusqlite::Error> {
        self.with_transaction(|tx| {
            let mut stmt = tx.prepare(
                "INSERT INTO price_samples (symbol_id, timestamp, price, volume)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for s in samples {
                stmt.execute(params![s.symbol_id, s.timestamp, s.price, s.volume])?;
            }
            Ok::<(), rusqlite::Error>(())
        })
    }

    /// Ticks for a symbol in ascending time order, optionally bounded
    /// (inclusive) by unix-second timestamps.
    pub fn get_samples(
        &self,
        symbol_id: i64,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Vec<PriceSample>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT symbol_id, timestamp, price, volume FROM price_samples
             WHERE symbol_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(
            params![symbol_id, from.unwrap_or(i64::MIN), to.unwrap_or(i64::MAX)],
            |row| {
                Ok(PriceSample {
                    symbol_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    price: row.get(2)?,
                    volume: row.get(3)?,
                })
            },
        )?;
        rows.collect()
    }

    /// Delete ticks of a symbol older than `before` (all when `None`).
    pub fn purge_samples(&self, symbol_id: i64, before: Option<i64>) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let removed = match before {
            Some(ts) => conn.execute(
                "DELETE FROM price_samples WHERE symbol_id = ?1 AND timestamp < ?2",
                params![symbol_id, ts],
            )?,
            None => conn.execute(
                "DELETE FROM price_samples WHERE symbol_id = ?1",
                params![symbol_id],
            )?,
        };
        Ok(removed)
    }

    /// Number of ticks retained for a symbol.
    pub fn sample_count(&self, symbol_id: i64) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM price_samples WHERE symbol_id = ?1",
            params![symbol_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========== Account Methods ==========

    /// Get an account by user id.
    pub fn get_account(&self, user_id: &str) -> Result<Option<Account>, rusqlite::Error> {
        let conn = self.conn();
        get_account_in(&conn, user_id)
    }

    /// Create the account if it does not exist and return the stored row.
    pub fn open_account(&self, user_id: &str, balance: f64, now: i64) -> Result<Account, rusqlite::Error> {
        self.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO accounts (user_id, balance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(user_id) DO NOTHING",
                params![user_id, balance, now],
            )?;
            get_account_in(tx, user_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
        })
    }

    // ========== Order Methods ==========

    /// Get an order by id.
    pub fn get_order(&self, order_id: &str) -> Result<Option<Order>, rusqlite::Error> {
        let conn = self.conn();
        get_order_in(&conn, order_id)
    }

    /// Orders of a user matching `status` at `now_ms`, newest first.
    pub fn get_user_orders(
        &self,
        user_id: &str,
        status: OrderStatus,
        now_ms: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Order>, rusqlite::Error> {
        let conn = self.conn();
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let select = |filter: &str| {
            format!(
                "SELECT {} FROM orders WHERE user_id = ?1 AND {}
                 ORDER BY created_at DESC LIMIT ?2",
                ORDER_COLUMNS, filter
            )
        };

        let mut stmt;
        let rows = match status {
            OrderStatus::Open => {
                stmt = conn.prepare(&select("outcome IS NULL AND expires_at > ?3"))?;
                stmt.query_map(params![user_id, limit, now_ms], order_from_row)?
            }
            OrderStatus::Settling => {
                stmt = conn.prepare(&select("outcome IS NULL AND expires_at <= ?3"))?;
                stmt.query_map(params![user_id, limit, now_ms], order_from_row)?
            }
            OrderStatus::Historical => {
                stmt = conn.prepare(&select("outcome IS NOT NULL"))?;
                stmt.query_map(params![user_id, limit], order_from_row)?
            }
        };
        rows.collect()
    }

    /// Unresolved orders with `expires_at <= now_ms`, oldest expiry first.
    pub fn get_due_orders(&self, now_ms: i64) -> Result<Vec<Order>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM orders WHERE outcome IS NULL AND expires_at <= ?1
             ORDER BY expires_at ASC",
            ORDER_COLUMNS
        ))?;
        let rows = stmt.query_map(params![now_ms], order_from_row)?;
        rows.collect()
    }

    /// Number of unresolved orders referencing a symbol.
    pub fn count_open_orders_for_symbol(&self, symbol_id: i64) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE symbol_id = ?1 AND outcome IS NULL",
            params![symbol_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

// ========== Transaction-scoped helpers ==========

/// Read an account using an existing connection or transaction.
pub(crate) fn get_account_in(conn: &Connection, user_id: &str) -> Result<Option<Account>, rusqlite::Error> {
    conn.query_row(
        "SELECT user_id, balance, created_at, updated_at FROM accounts WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok(Account {
                user_id: row.get(0)?,
                balance: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        },
    )
    .optional()
}

/// Subtract `amount` only if the balance covers it. Returns rows changed (0 or 1).
pub(crate) fn debit_in(conn: &Connection, user_id: &str, amount: f64, now: i64) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE accounts SET balance = balance - ?2, updated_at = ?3
         WHERE user_id = ?1 AND balance >= ?2",
        params![user_id, amount, now],
    )
}

/// Add `amount` to a balance. Returns rows changed (0 or 1).
pub(crate) fn credit_in(conn: &Connection, user_id: &str, amount: f64, now: i64) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE accounts SET balance = balance + ?2, updated_at = ?3 WHERE user_id = ?1",
        params![user_id, amount, now],
    )
}

pub(crate) fn get_order_in(conn: &Connection, order_id: &str) -> Result<Option<Order>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS),
        params![order_id],
        order_from_row,
    )
    .optional()
}

pub(crate) fn insert_order_in(conn: &Connection, order: &Order) -> Result<(), rusqlite::Error> {
    conn.execute(
        &format!(
            "INSERT INTO orders ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                ?13, ?14, ?15, ?16)",
            ORDER_COLUMNS
        ),
        params![
            order.id,
            order.user_id,
            order.symbol_id,
            order.amount,
            order.direction.as_str(),
            order.entry_price,
            order.manipulated_entry_price,
            order.exit_price,
            order.manipulated_exit_price,
            order.duration,
            order.payout_percent,
            order.outcome.map(|o| o.as_str()),
            order.profit_loss,
            order.created_at,
            order.expires_at,
            order.resolved_at,
        ],
    )?;
    Ok(())
}

/// Write the settlement fields, but only while the outcome is still unset.
/// Returns rows changed: 1 if this call won the transition, 0 otherwise.
pub(crate) fn resolve_order_in(conn: &Connection, order: &Order) -> Result<usize, rusqlite::Error> {
    conn.execute(
        "UPDATE orders SET exit_price = ?2, manipulated_exit_price = ?3, outcome = ?4,
            profit_loss = ?5, resolved_at = ?6
         WHERE id = ?1 AND outcome IS NULL",
        params![
            order.id,
            order.exit_price,
            order.manipulated_exit_price,
            order.outcome.map(|o| o.as_str()),
            order.profit_loss,
            order.resolved_at,
        ],
    )
}

fn conversion_error(idx: usize, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected value '{}'", value).into(),
    )
}

fn symbol_from_row(row: &Row<'_>) -> Result<SymbolConfig, rusqlite::Error> {
    let trend: String = row.get(3)?;
    Ok(SymbolConfig {
        id: row.get(0)?,
        name: row.get(1)?,
        ticker: row.get(2)?,
        trend: Trend::parse(&trend).ok_or_else(|| conversion_error(3, trend.clone()))?,
        volatility: row.get(4)?,
        bias: row.get(5)?,
        manipulation_percentage: row.get(6)?,
        min_amount: row.get(7)?,
        max_amount: row.get(8)?,
        payout_percent: row.get(9)?,
        enabled: row.get(10)?,
        reference_price: row.get(11)?,
        manipulated_price: row.get(12)?,
        price_updated_at: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn order_from_row(row: &Row<'_>) -> Result<Order, rusqlite::Error> {
    let direction: String = row.get(4)?;
    let outcome: Option<String> = row.get(11)?;
    let outcome = match outcome {
        Some(value) => Some(Outcome::parse(&value).ok_or_else(|| conversion_error(11, value.clone()))?),
        None => None,
    };

    Ok(Order {
        id: row.get(0)?,
        user_id: row.get(1)?,
        symbol_id: row.get(2)?,
        amount: row.get(3)?,
        direction: Direction::parse(&direction).ok_or_else(|| conversion_error(4, direction.clone()))?,
        entry_price: row.get(5)?,
        manipulated_entry_price: row.get(6)?,
        exit_price: row.get(7)?,
        manipulated_exit_price: row.get(8)?,
        duration: row.get(9)?,
        payout_percent: row.get(10)?,
        outcome,
        profit_loss: row.get(12)?,
        created_at: row.get(13)?,
        expires_at: row.get(14)?,
        resolved_at: row.get(15)?,
    })
}
