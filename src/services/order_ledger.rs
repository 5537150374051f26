//! Order Ledger
//!
//! Owns the lifecycle of binary trades:
//! - Placement: ordered validation, then stake debit + order insert in one
//!   transaction, with entry prices read under the symbol lock
//! - Settlement: write-once `Open -> Win | Loss` transition, with the payout
//!   credit committed in the same transaction as the outcome
//! - Sweeping: resolution of every order past expiry
//! - Queries: detail, status listings, trades overview
//!
//! Uses SQLite as the source of truth and a DashMap cache of open orders.

use crate::config::SettlementConfig;
use crate::services::sqlite_store::{insert_order_in, resolve_order_in};
use crate::services::{BalanceLedger, SqliteStore, SymbolRegistry};
use crate::types::{
    settle, Direction, Order, OrderStatus, PlaceOrderRequest, Settlement, TradesOverview,
};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Closed trades returned by the trades overview.
pub const CLOSED_TRADES_LIMIT: usize = 50;

/// Order and balance ledger errors.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Symbol not found: {0}")]
    SymbolNotFound(i64),

    #[error("Symbol {0} is disabled")]
    SymbolDisabled(i64),

    #[error("Amount {amount} outside allowed range [{min}, {max}]")]
    AmountOutOfRange { amount: f64, min: f64, max: f64 },

    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: f64, available: f64 },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("No price data available for symbol {0}")]
    NoPriceData(i64),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl From<rusqlite::Error> for TradingError {
    fn from(e: rusqlite::Error) -> Self {
        TradingError::DatabaseError(e.to_string())
    }
}

/// Outcome counts of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orders past expiry when the sweep started.
    pub due: usize,
    /// Orders this sweep settled.
    pub resolved: usize,
    /// Orders settled concurrently by someone else.
    pub already_resolved: usize,
    /// Orders whose settlement failed and remain open.
    pub failed: usize,
    /// Failed orders overdue by more than the stale threshold.
    pub stale: usize,
}

/// Binary trade ledger.
pub struct OrderLedger {
    registry: Arc<SymbolRegistry>,
    sqlite: Arc<SqliteStore>,
    balances: Arc<BalanceLedger>,
    /// Open orders cache (order_id -> Order)
    open_orders: DashMap<String, Order>,
    config: SettlementConfig,
}

impl OrderLedger {
    pub fn new(
        registry: Arc<SymbolRegistry>,
        sqlite: Arc<SqliteStore>,
        balances: Arc<BalanceLedger>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            registry,
            sqlite,
            balances,
            open_orders: DashMap::new(),
            config,
        }
    }

    pub fn balances(&self) -> &Arc<BalanceLedger> {
        &self.balances
    }

    /// Load every unresolved order into the cache. Returns them so the caller
    /// can schedule their settlement.
    pub fn load_open_orders(&self) -> Result<Vec<Order>, TradingError> {
        let pending = self.sqlite.get_due_orders(i64::MAX)?;
        for order in &pending {
            self.open_orders.insert(order.id.clone(), order.clone());
        }
        info!("Loaded {} open orders from SQLite", pending.len());
        Ok(pending)
    }

    // ========== Placement ==========

    /// Place an order at the current wall-clock time.
    pub fn place_order(&self, request: PlaceOrderRequest) -> Result<Order, TradingError> {
        self.place_order_at(request, chrono::Utc::now().timestamp_millis())
    }

    /// Place an order as of `now_ms`.
    ///
    /// Preconditions are checked in order and the first failure wins: symbol
    /// exists and is enabled, amount within bounds, direction valid (and
    /// duration within limits), balance covers the stake, symbol has a
    /// published price. Nothing is mutated unless all of them pass.
    pub fn place_order_at(&self, request: PlaceOrderRequest, now_ms: i64) -> Result<Order, TradingError> {
        let user_id = request.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(TradingError::InvalidOrder("userId is required".to_string()));
        }
        let symbol_id = request.symbol_id;
        let amount = request.amount;

        let order = self
            .registry
            .with_symbol(symbol_id, |symbol| -> Result<Order, TradingError> {
                if !symbol.enabled {
                    return Err(TradingError::SymbolDisabled(symbol_id));
                }

                // Written so that NaN falls outside the range.
                if !(symbol.min_amount <= amount && amount <= symbol.max_amount) {
                    return Err(TradingError::AmountOutOfRange {
                        amount,
                        min: symbol.min_amount,
                        max: symbol.max_amount,
                    });
                }

                let direction = Direction::parse(request.direction.trim().to_ascii_lowercase().as_str())
                    .ok_or_else(|| TradingError::InvalidDirection(request.direction.clone()))?;

                if request.duration <= 0 || request.duration > self.config.max_order_duration_secs {
                    return Err(TradingError::InvalidOrder(format!(
                        "Duration must be between 1 and {} seconds",
                        self.config.max_order_duration_secs
                    )));
                }

                let available = self.balances.balance(&user_id)?;
                if available < amount {
                    return Err(TradingError::InsufficientBalance {
                        needed: amount,
                        available,
                    });
                }

                if !symbol.has_price() {
                    return Err(TradingError::NoPriceData(symbol_id));
                }

                let order = Order {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.clone(),
                    symbol_id,
                    amount,
                    direction,
                    entry_price: symbol.reference_price,
                    manipulated_entry_price: symbol.manipulated_price,
                    exit_price: None,
                    manipulated_exit_price: None,
                    duration: request.duration,
                    payout_percent: symbol.payout_percent,
                    outcome: None,
                    profit_loss: None,
                    created_at: now_ms,
                    expires_at: now_ms + request.duration * 1000,
                    resolved_at: None,
                };

                // The balance read above is advisory; the conditional debit
                // inside the transaction is what serializes concurrent stakes.
                self.sqlite.with_transaction(|tx| {
                    self.balances.debit(tx, &order.user_id, order.amount, now_ms)?;
                    insert_order_in(tx, &order)?;
                    Ok::<(), TradingError>(())
                })?;

                Ok(order)
            })
            .ok_or(TradingError::SymbolNotFound(symbol_id))??;

        self.open_orders.insert(order.id.clone(), order.clone());

        info!(
            "Placed order {} for {}: {} {} on symbol {} at {} for {}s",
            order.id,
            order.user_id,
            order.direction,
            order.amount,
            order.symbol_id,
            order.manipulated_entry_price,
            order.duration
        );

        Ok(order)
    }

    // ========== Settlement ==========

    /// Settle an order as of `now_ms` against the symbol's current prices.
    ///
    /// Safe to call any number of times and from concurrent tasks: exactly one
    /// call observes [`Settlement::Resolved`], the rest get
    /// [`Settlement::AlreadyResolved`] with the stored result. Calls before
    /// `expires_at` return [`Settlement::NotDue`]. On error the order stays open.
    pub fn resolve_order(&self, order_id: &str, now_ms: i64) -> Result<Settlement, TradingError> {
        let order = self
            .sqlite
            .get_order(order_id)?
            .ok_or_else(|| TradingError::OrderNotFound(order_id.to_string()))?;

        if !order.is_open() {
            self.open_orders.remove(order_id);
            return Ok(Settlement::AlreadyResolved(order));
        }
        if order.expires_at > now_ms {
            return Ok(Settlement::NotDue(order));
        }

        let symbol_id = order.symbol_id;
        let (won_transition, resolved, credit) = self
            .registry
            .with_symbol(symbol_id, |symbol| -> Result<(bool, Order, f64), TradingError> {
                let result = settle(
                    order.direction,
                    order.manipulated_entry_price,
                    symbol.manipulated_price,
                    order.amount,
                    order.payout_percent,
                );

                let resolved = Order {
                    exit_price: Some(symbol.reference_price),
                    manipulated_exit_price: Some(symbol.manipulated_price),
                    outcome: Some(result.outcome),
                    profit_loss: Some(result.profit_loss),
                    resolved_at: Some(now_ms),
                    ..order.clone()
                };

                let won_transition = self.sqlite.with_transaction(|tx| {
                    if resolve_order_in(tx, &resolved)? == 0 {
                        return Ok::<bool, TradingError>(false);
                    }
                    if result.credit > 0.0 {
                        self.balances.credit(tx, &resolved.user_id, result.credit, now_ms)?;
                    }
                    Ok(true)
                })?;

                Ok((won_transition, resolved, result.credit))
            })
            .ok_or(TradingError::SymbolNotFound(symbol_id))??;

        self.open_orders.remove(order_id);

        if !won_transition {
            debug!("Order {} was settled concurrently", order_id);
            let current = self
                .sqlite
                .get_order(order_id)?
                .ok_or_else(|| TradingError::OrderNotFound(order_id.to_string()))?;
            return Ok(Settlement::AlreadyResolved(current));
        }

        info!(
            "Settled order {}: {} (entry {} exit {:?}) profit/loss {:?}, credited {}",
            resolved.id,
            resolved.outcome.map(|o| o.as_str()).unwrap_or("-"),
            resolved.manipulated_entry_price,
            resolved.manipulated_exit_price,
            resolved.profit_loss,
            credit
        );

        Ok(Settlement::Resolved(resolved))
    }

    /// Settle every unresolved order with `expires_at <= now_ms`.
    pub fn sweep_expired(&self, now_ms: i64) -> Result<SweepReport, TradingError> {
        let due = self.sqlite.get_due_orders(now_ms)?;
        let stale_ms = self.config.stale_after.as_millis() as i64;
        let mut report = SweepReport {
            due: due.len(),
            ..Default::default()
        };

        for order in due {
            match self.resolve_order(&order.id, now_ms) {
                Ok(Settlement::Resolved(_)) => report.resolved += 1,
                Ok(Settlement::AlreadyResolved(_)) => report.already_resolved += 1,
                Ok(Settlement::NotDue(_)) => {}
                Err(e) => {
                    report.failed += 1;
                    let overdue_ms = now_ms - order.expires_at;
                    if overdue_ms > stale_ms {
                        report.stale += 1;
                        error!(
                            "Order {} still open {}s past expiry: {}",
                            order.id,
                            overdue_ms / 1000,
                            e
                        );
                    } else {
                        warn!("Failed to settle order {}: {}", order.id, e);
                    }
                }
            }
        }

        if report.due > 0 {
            debug!(
                "Sweep: {} due, {} settled, {} already settled, {} failed",
                report.due, report.resolved, report.already_resolved, report.failed
            );
        }

        Ok(report)
    }

    // ========== Queries ==========

    /// Get an order by id.
    pub fn get_order(&self, order_id: &str) -> Result<Order, TradingError> {
        if let Some(order) = self.open_orders.get(order_id) {
            return Ok(order.clone());
        }
        self.sqlite
            .get_order(order_id)?
            .ok_or_else(|| TradingError::OrderNotFound(order_id.to_string()))
    }

    /// Orders of a user in `status` as of `now_ms`, newest first.
    pub fn list_orders(
        &self,
        user_id: &str,
        status: OrderStatus,
        now_ms: i64,
        limit: Option<usize>,
    ) -> Result<Vec<Order>, TradingError> {
        Ok(self.sqlite.get_user_orders(user_id, status, now_ms, limit)?)
    }

    /// Every unresolved trade of a user plus the most recent closed ones.
    pub fn trades_overview(&self, user_id: &str, now_ms: i64) -> Result<TradesOverview, TradingError> {
        let mut open_trades = self.sqlite.get_user_orders(user_id, OrderStatus::Open, now_ms, None)?;
        open_trades.extend(self.sqlite.get_user_orders(user_id, OrderStatus::Settling, now_ms, None)?);
        open_trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let closed_trades = self.sqlite.get_user_orders(
            user_id,
            OrderStatus::Historical,
            now_ms,
            Some(CLOSED_TRADES_LIMIT),
        )?;

        Ok(TradesOverview {
            open_trades,
            closed_trades,
        })
    }

    /// Number of cached open orders.
    pub fn open_order_count(&self) -> usize {
        self.open_orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreateSymbolRequest, Outcome, Trend};

    struct Fixture {
        registry: Arc<SymbolRegistry>,
        ledger: OrderLedger,
        symbol_id: i64,
    }

    fn fixture(balance: f64) -> Fixture {
        let sqlite = Arc::new(SqliteStore::new_in_memory().unwrap());
        let registry = SymbolRegistry::load(sqlite.clone()).unwrap();
        let symbol = registry
            .create(CreateSymbolRequest {
                name: "BTC/USDT".to_string(),
                ticker: None,
                trend: Trend::Sideways,
                volatility: 0.0,
                bias: 0.0,
                manipulation_percentage: 0.0,
                min_amount: 1.0,
                max_amount: 1000.0,
                payout_percent: 80.0,
                enabled: true,
                current_price: None,
            })
            .unwrap();
        registry.publish_prices(symbol.id, 100.0, 100.0, 0);

        let balances = Arc::new(BalanceLedger::new(sqlite.clone(), balance));
        balances.open_account("alice").unwrap();
        let ledger = OrderLedger::new(registry.clone(), sqlite, balances, SettlementConfig::default());

        Fixture {
            registry,
            ledger,
            symbol_id: symbol.id,
        }
    }

    fn request(symbol_id: i64, amount: f64, direction: &str) -> PlaceOrderRequest {
        PlaceOrderRequest {
            user_id: "alice".to_string(),
            symbol_id,
            amount,
            direction: direction.to_string(),
            duration: 30,
        }
    }

    #[test]
    fn test_place_order_debits_stake() {
        let f = fixture(100.0);
        let order = f.ledger.place_order_at(request(f.symbol_id, 40.0, "up"), 1_000).unwrap();

        assert_eq!(f.ledger.balances().balance("alice").unwrap(), 60.0);
        assert!(order.outcome.is_none());
        assert_eq!(order.expires_at, 31_000);
        assert_eq!(order.manipulated_entry_price, 100.0);
        assert_eq!(order.payout_percent, 80.0);
        assert_eq!(f.ledger.open_order_count(), 1);
    }

    #[test]
    fn test_precondition_order() {
        let f = fixture(10.0);
        f.registry
            .update(
                f.symbol_id,
                crate::types::SymbolUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();

        // Disabled wins over every later failure.
        let err = f.ledger.place_order_at(request(f.symbol_id, 5000.0, "left"), 0).unwrap_err();
        assert!(matches!(err, TradingError::SymbolDisabled(_)));

        let err = f.ledger.place_order_at(request(999, 5.0, "up"), 0).unwrap_err();
        assert!(matches!(err, TradingError::SymbolNotFound(999)));
    }

    #[test]
    fn test_validation_errors_leave_balance_untouched() {
        let f = fixture(10.0);

        let err = f.ledger.place_order_at(request(f.symbol_id, 0.5, "left"), 0).unwrap_err();
        assert!(matches!(err, TradingError::AmountOutOfRange { .. }));

        let err = f.ledger.place_order_at(request(f.symbol_id, 50.0, "left"), 0).unwrap_err();
        assert!(matches!(err, TradingError::InvalidDirection(_)));

        let err = f.ledger.place_order_at(request(f.symbol_id, 50.0, "down"), 0).unwrap_err();
        assert!(matches!(err, TradingError::InsufficientBalance { .. }));

        let mut bad_duration = request(f.symbol_id, 5.0, "up");
        bad_duration.duration = 0;
        let err = f.ledger.place_order_at(bad_duration, 0).unwrap_err();
        assert!(matches!(err, TradingError::InvalidOrder(_)));

        assert_eq!(f.ledger.balances().balance("alice").unwrap(), 10.0);
        assert_eq!(f.ledger.open_order_count(), 0);
    }

    #[test]
    fn test_no_price_yet() {
        let f = fixture(100.0);
        f.registry.publish_prices(f.symbol_id, 0.0, 0.0, 0);
        let err = f.ledger.place_order_at(request(f.symbol_id, 5.0, "up"), 0).unwrap_err();
        assert!(matches!(err, TradingError::NoPriceData(_)));
        assert_eq!(f.ledger.balances().balance("alice").unwrap(), 100.0);
    }

    #[test]
    fn test_win_credits_principal_and_profit() {
        let f = fixture(100.0);
        let order = f.ledger.place_order_at(request(f.symbol_id, 40.0, "up"), 0).unwrap();
        f.registry.publish_prices(f.symbol_id, 104.0, 105.0, 30_000);

        let settlement = f.ledger.resolve_order(&order.id, 30_000).unwrap();
        let resolved = match settlement {
            Settlement::Resolved(o) => o,
            other => panic!("unexpected settlement: {other:?}"),
        };
        assert_eq!(resolved.outcome, Some(Outcome::Win));
        assert_eq!(resolved.profit_loss, Some(32.0));
        assert_eq!(resolved.exit_price, Some(104.0));
        assert_eq!(resolved.manipulated_exit_price, Some(105.0));
        assert_eq!(f.ledger.balances().balance("alice").unwrap(), 60.0 + 72.0);
    }

    #[test]
    fn test_loss_leaves_balance() {
        let f = fixture(100.0);
        let order = f.ledger.place_order_at(request(f.symbol_id, 40.0, "down"), 0).unwrap();
        f.registry.publish_prices(f.symbol_id, 105.0, 105.0, 30_000);

        let settlement = f.ledger.resolve_order(&order.id, 30_000).unwrap();
        assert_eq!(settlement.order().outcome, Some(Outcome::Loss));
        assert_eq!(settlement.order().profit_loss, Some(-40.0));
        assert_eq!(f.ledger.balances().balance("alice").unwrap(), 60.0);
    }

    #[test]
    fn test_resolution_is_idempotent_and_waits_for_expiry() {
        let f = fixture(100.0);
        let order = f.ledger.place_order_at(request(f.symbol_id, 40.0, "up"), 0).unwrap();

        assert!(matches!(f.ledger.resolve_order(&order.id, 29_999).unwrap(), Settlement::NotDue(_)));

        f.registry.publish_prices(f.symbol_id, 110.0, 110.0, 30_000);
        let first = f.ledger.resolve_order(&order.id, 30_000).unwrap();
        f.registry.publish_prices(f.symbol_id, 50.0, 50.0, 31_000);
        let second = f.ledger.resolve_order(&order.id, 31_000).unwrap();

        assert!(matches!(first, Settlement::Resolved(_)));
        assert!(matches!(second, Settlement::AlreadyResolved(_)));
        assert_eq!(first.order(), second.order());
        assert_eq!(f.ledger.balances().balance("alice").unwrap(), 60.0 + 72.0);
    }

    #[test]
    fn test_concurrent_resolution_credits_once() {
        let f = fixture(100.0);
        let order = f.ledger.place_order_at(request(f.symbol_id, 40.0, "up"), 0).unwrap();
        f.registry.publish_prices(f.symbol_id, 105.0, 105.0, 30_000);

        let ledger = Arc::new(f.ledger);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let id = order.id.clone();
                std::thread::spawn(move || ledger.resolve_order(&id, 30_000).unwrap())
            })
            .collect();

        let resolved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|s| matches!(s, Settlement::Resolved(_)))
            .count();

        assert_eq!(resolved, 1);
        assert_eq!(ledger.balances().balance("alice").unwrap(), 132.0);
    }

    #[test]
    fn test_sweep_and_status_queries() {
        let f = fixture(100.0);
        let short = f.ledger.place_order_at(request(f.symbol_id, 10.0, "up"), 0).unwrap();
        let mut long_req = request(f.symbol_id, 10.0, "up");
        long_req.duration = 600;
        let long = f.ledger.place_order_at(long_req, 0).unwrap();

        let settling = f.ledger.list_orders("alice", OrderStatus::Settling, 30_000, None).unwrap();
        assert_eq!(settling.len(), 1);
        assert_eq!(settling[0].id, short.id);
        let open = f.ledger.list_orders("alice", OrderStatus::Open, 30_000, None).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, long.id);

        let report = f.ledger.sweep_expired(30_000).unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.resolved, 1);

        let overview = f.ledger.trades_overview("alice", 30_000).unwrap();
        assert_eq!(overview.open_trades.len(), 1);
        assert_eq!(overview.closed_trades.len(), 1);
        assert_eq!(f.ledger.get_order(&short.id).unwrap().outcome, Some(Outcome::Loss));
    }

    #[test]
    fn test_concurrent_placements_never_overdraw() {
        let f = fixture(100.0);
        let ledger = Arc::new(f.ledger);
        let symbol_id = f.symbol_id;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.place_order_at(request(symbol_id, 30.0, "up"), 0).is_ok())
            })
            .collect();
        let placed = handles.into_iter().filter_map(|h| h.join().ok()).filter(|ok| *ok).count();

        assert_eq!(placed, 3);
        assert_eq!(ledger.balances().balance("alice").unwrap(), 10.0);
    }
}
