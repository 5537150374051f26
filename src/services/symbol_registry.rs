//! Symbol registry
//!
//! In-memory view of every tradable symbol, keyed by id. Each entry sits
//! behind its own `RwLock` so readers always observe the reference and
//! manipulated price of the same tick, and a slow writer on one symbol never
//! blocks another. Admin edits are written through to SQLite.

use crate::error::AppError;
use crate::services::SqliteStore;
use crate::types::{CreateSymbolRequest, PriceSnapshot, SymbolConfig, SymbolUpdate};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

struct SymbolEntry {
    config: RwLock<SymbolConfig>,
    /// Set under the write lock when the symbol is deleted, so holders of a
    /// stale `Arc` see the removal once they acquire the lock.
    deleted: AtomicBool,
}

impl SymbolEntry {
    fn new(config: SymbolConfig) -> Arc<Self> {
        Arc::new(Self {
            config: RwLock::new(config),
            deleted: AtomicBool::new(false),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, SymbolConfig> {
        self.config.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SymbolConfig> {
        self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Registry of symbol configurations and live prices.
pub struct SymbolRegistry {
    symbols: DashMap<i64, Arc<SymbolEntry>>,
    sqlite: Arc<SqliteStore>,
}

impl SymbolRegistry {
    /// Build a registry from every symbol persisted in the store.
    pub fn load(sqlite: Arc<SqliteStore>) -> Result<Arc<Self>, AppError> {
        let symbols = DashMap::new();
        for config in sqlite.list_symbols()? {
            symbols.insert(config.id, SymbolEntry::new(config));
        }
        info!("Loaded {} symbols", symbols.len());
        Ok(Arc::new(Self { symbols, sqlite }))
    }

    fn entry(&self, id: i64) -> Option<Arc<SymbolEntry>> {
        self.symbols.get(&id).map(|e| e.value().clone())
    }

    /// Create a symbol.
    pub fn create(&self, request: CreateSymbolRequest) -> Result<SymbolConfig, AppError> {
        let now = chrono::Utc::now().timestamp_millis();
        let mut config = request.into_config(now);
        config.validate().map_err(AppError::BadRequest)?;

        config.id = self.sqlite.insert_symbol(&config)?;
        self.symbols.insert(config.id, SymbolEntry::new(config.clone()));

        info!("Created symbol {} ({}, ticker {})", config.id, config.name, config.ticker);
        Ok(config)
    }

    /// Current configuration and prices of a symbol.
    pub fn get(&self, id: i64) -> Option<SymbolConfig> {
        self.with_symbol(id, |config| config.clone())
    }

    /// Run `f` against a consistent view of the symbol. The read lock is held
    /// for the duration of `f`, which blocks price publication and admin edits
    /// of this symbol (but no other) until it returns. `None` if unknown.
    pub fn with_symbol<R>(&self, id: i64, f: impl FnOnce(&SymbolConfig) -> R) -> Option<R> {
        let entry = self.entry(id)?;
        let guard = entry.read();
        if entry.deleted.load(Ordering::Acquire) {
            return None;
        }
        Some(f(&guard))
    }

    /// Both live prices of a symbol.
    pub fn snapshot(&self, id: i64) -> Option<PriceSnapshot> {
        self.with_symbol(id, |config| config.snapshot())
    }

    /// All symbols ordered by id.
    pub fn list(&self) -> Vec<SymbolConfig> {
        // Collect the Arcs first so no DashMap shard lock is held while
        // waiting on a symbol lock.
        let entries: Vec<Arc<SymbolEntry>> = self.symbols.iter().map(|e| e.value().clone()).collect();

        let mut all = Vec::with_capacity(entries.len());
        for entry in entries {
            let guard = entry.read();
            if !entry.deleted.load(Ordering::Acquire) {
                all.push(guard.clone());
            }
        }
        all.sort_by_key(|s| s.id);
        all
    }

    /// Enabled symbols ordered by id.
    pub fn list_enabled(&self) -> Vec<SymbolConfig> {
        self.list().into_iter().filter(|s| s.enabled).collect()
    }

    /// One page (1-based) of symbols plus the total count.
    pub fn list_page(&self, page: usize, limit: usize) -> (Vec<SymbolConfig>, usize) {
        let all = self.list();
        let total = all.len();
        let skip = page.saturating_sub(1).saturating_mul(limit);
        (all.into_iter().skip(skip).take(limit).collect(), total)
    }

    /// Ids of enabled symbols.
    pub fn enabled_ids(&self) -> Vec<i64> {
        self.list_enabled().into_iter().map(|s| s.id).collect()
    }

    /// Apply a partial admin edit.
    pub fn update(&self, id: i64, update: SymbolUpdate) -> Result<SymbolConfig, AppError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| AppError::NotFound(format!("Symbol {}", id)))?;
        let mut guard = entry.write();
        if entry.deleted.load(Ordering::Acquire) {
            return Err(AppError::NotFound(format!("Symbol {}", id)));
        }

        let mut next = guard.clone();
        next.apply(&update);
        next.validate().map_err(AppError::BadRequest)?;
        next.updated_at = chrono::Utc::now().timestamp_millis();

        self.sqlite.update_symbol(&next)?;
        *guard = next.clone();

        info!(
            "Updated symbol {}: trend={} volatility={} bias={} manipulation={} payout={} enabled={}",
            id,
            next.trend,
            next.volatility,
            next.bias,
            next.manipulation_percentage,
            next.payout_percent,
            next.enabled
        );
        Ok(next)
    }

    /// Delete a symbol. Refused while any unresolved order references it.
    pub fn delete(&self, id: i64) -> Result<(), AppError> {
        let entry = self
            .entry(id)
            .ok_or_else(|| AppError::NotFound(format!("Symbol {}", id)))?;
        let _guard = entry.write();
        if entry.deleted.load(Ordering::Acquire) {
            return Err(AppError::NotFound(format!("Symbol {}", id)));
        }

        let open = self.sqlite.count_open_orders_for_symbol(id)?;
        if open > 0 {
            return Err(AppError::Conflict(format!(
                "Symbol {} has {} open orders",
                id, open
            )));
        }

        self.sqlite.delete_symbol(id)?;
        entry.deleted.store(true, Ordering::Release);
        self.symbols.remove(&id);

        info!("Deleted symbol {}", id);
        Ok(())
    }

    /// Publish a new pair of live prices for a symbol. Both fields change under
    /// one write lock. Only the symbol's refresh task calls this.
    pub fn publish_prices(&self, id: i64, reference_price: f64, manipulated_price: f64, at_ms: i64) -> bool {
        let Some(entry) = self.entry(id) else {
            return false;
        };
        let mut guard = entry.write();
        if entry.deleted.load(Ordering::Acquire) {
            return false;
        }
        guard.reference_price = reference_price;
        guard.manipulated_price = manipulated_price;
        guard.price_updated_at = at_ms;
        debug!(
            "Symbol {} price: reference={} manipulated={}",
            id, reference_price, manipulated_price
        );
        true
    }
}
