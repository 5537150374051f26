//! Balance Ledger
//!
//! Per-user balances. Outside of account opening, a balance changes in exactly
//! two places: the stake debit when an order is created and the payout credit
//! when an order wins. Both are only reachable through an open SQLite
//! transaction so they always commit together with their order mutation.

use crate::services::order_ledger::TradingError;
use crate::services::sqlite_store::{credit_in, debit_in, get_account_in};
use crate::services::SqliteStore;
use crate::types::Account;
use rusqlite::Transaction;
use std::sync::Arc;
use tracing::{debug, info};

/// Ledger of user balances.
pub struct BalanceLedger {
    sqlite: Arc<SqliteStore>,
    starting_balance: f64,
}

impl BalanceLedger {
    pub fn new(sqlite: Arc<SqliteStore>, starting_balance: f64) -> Self {
        Self {
            sqlite,
            starting_balance,
        }
    }

    /// Open an account with the starting balance, or return the existing one
    /// unchanged.
    pub fn open_account(&self, user_id: &str) -> Result<Account, TradingError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(TradingError::InvalidOrder("userId is required".to_string()));
        }
        let now = chrono::Utc::now().timestamp_millis();
        let account = self.sqlite.open_account(user_id, self.starting_balance, now)?;
        info!("Account {} open with balance {}", account.user_id, account.balance);
        Ok(account)
    }

    pub fn account(&self, user_id: &str) -> Result<Account, TradingError> {
        self.sqlite
            .get_account(user_id)?
            .ok_or_else(|| TradingError::AccountNotFound(user_id.to_string()))
    }

    /// Current balance of a user.
    pub fn balance(&self, user_id: &str) -> Result<f64, TradingError> {
        Ok(self.account(user_id)?.balance)
    }

    /// Take `amount` out of a balance inside `tx`. Fails without touching the
    /// row if the result would be negative.
    pub(crate) fn debit(
        &self,
        tx: &Transaction<'_>,
        user_id: &str,
        amount: f64,
        now_ms: i64,
    ) -> Result<(), TradingError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TradingError::InvalidOrder(format!("Invalid debit amount {}", amount)));
        }

        if debit_in(tx, user_id, amount, now_ms)? == 0 {
            return Err(match get_account_in(tx, user_id)? {
                Some(account) => TradingError::InsufficientBalance {
                    needed: amount,
                    available: account.balance,
                },
                None => TradingError::AccountNotFound(user_id.to_string()),
            });
        }

        debug!("Debited {} from {}", amount, user_id);
        Ok(())
    }

    /// Add `amount` to a balance inside `tx`.
    pub(crate) fn credit(
        &self,
        tx: &Transaction<'_>,
        user_id: &str,
        amount: f64,
        now_ms: i64,
    ) -> Result<(), TradingError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(TradingError::InvalidOrder(format!("Invalid credit amount {}", amount)));
        }

        if credit_in(tx, user_id, amount, now_ms)? == 0 {
            return Err(TradingError::AccountNotFound(user_id.to_string()));
        }

        debug!("Credited {} to {}", amount, user_id);
        Ok(())
    }
}
