//! Settlement scheduling.
//!
//! Two drivers settle expired orders through [`OrderLedger::resolve_order`]:
//! a sleep-until-expiry timer per placed order, which gets results out
//! promptly, and a periodic sweep over every open order past expiry, which
//! catches whatever the timers missed (including orders whose timers were
//! lost in a restart). Both may hit the same order; settlement is idempotent.

use crate::config::SettlementConfig;
use crate::services::order_ledger::SweepReport;
use crate::services::OrderLedger;
use crate::types::{Order, Settlement};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// An armed expiry timer. `generation` tells a finishing task whether the
/// map entry is still its own or a later re-schedule of the same order.
struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Expiry timers plus the periodic sweep.
pub struct SettlementScheduler {
    ledger: Arc<OrderLedger>,
    config: SettlementConfig,
    /// Pending expiry timers (order_id -> task)
    timers: DashMap<String, Timer>,
    next_generation: AtomicU64,
}

impl SettlementScheduler {
    pub fn new(ledger: Arc<OrderLedger>, config: SettlementConfig) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            config,
            timers: DashMap::new(),
            next_generation: AtomicU64::new(0),
        })
    }

    /// Arm a timer that settles `order` once it expires. Re-scheduling an
    /// order replaces its previous timer.
    pub fn schedule(self: &Arc<Self>, order: &Order) {
        if !order.is_open() {
            return;
        }

        let order_id = order.id.clone();
        let delay_ms = order.expires_at - chrono::Utc::now().timestamp_millis();
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let scheduler = self.clone();
        let task_order_id = order_id.clone();
        let spawn_timer = move || {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                scheduler.clone().settle_off_runtime(&task_order_id).await;
                scheduler
                    .timers
                    .remove_if(&task_order_id, |_, timer| timer.generation == generation);
            })
        };

        // Spawning while the entry holds its shard lock means the task's own
        // removal cannot run before the handle is stored.
        match self.timers.entry(order_id.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = entry.insert(Timer {
                    generation,
                    handle: spawn_timer(),
                });
                previous.handle.abort();
            }
            Entry::Vacant(entry) => {
                entry.insert(Timer {
                    generation,
                    handle: spawn_timer(),
                });
            }
        }

        debug!("Scheduled settlement of order {} in {:?}", order_id, delay);
    }

    /// Arm timers for a batch of orders (e.g. those loaded at startup).
    pub fn schedule_all(self: &Arc<Self>, orders: &[Order]) {
        for order in orders {
            self.schedule(order);
        }
        if !orders.is_empty() {
            info!("Scheduled settlement of {} open orders", orders.len());
        }
    }

    /// Settlement takes SQLite and symbol locks; run it on the blocking pool.
    async fn settle_off_runtime(self: Arc<Self>, order_id: &str) {
        let id = order_id.to_string();
        if let Err(e) = tokio::task::spawn_blocking(move || self.fire(&id)).await {
            warn!("Settlement task for order {} did not complete: {}", order_id, e);
        }
    }

    fn fire(&self, order_id: &str) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        match self.ledger.resolve_order(order_id, now_ms) {
            Ok(Settlement::Resolved(_)) | Ok(Settlement::AlreadyResolved(_)) => {}
            // Timer woke before the wall clock reached expiry; the sweep
            // picks the order up.
            Ok(Settlement::NotDue(order)) => {
                debug!("Order {} not due yet (expires at {})", order.id, order.expires_at);
            }
            Err(e) => warn!("Timer settlement of order {} failed: {}", order_id, e),
        }
    }

    /// Settle every order past expiry now.
    pub fn sweep_once(&self) -> SweepReport {
        self.timers.retain(|_, timer| !timer.handle.is_finished());

        let now_ms = chrono::Utc::now().timestamp_millis();
        match self.ledger.sweep_expired(now_ms) {
            Ok(report) => {
                if report.resolved > 0 {
                    info!("Settlement sweep resolved {} orders", report.resolved);
                }
                if report.stale > 0 {
                    error!(
                        "{} orders are unresolved more than {:?} past expiry",
                        report.stale, self.config.stale_after
                    );
                }
                report
            }
            Err(e) => {
                error!("Settlement sweep failed: {}", e);
                SweepReport::default()
            }
        }
    }

    /// Sweep forever on the configured cadence. The first pass runs at once.
    pub async fn run_sweep(self: Arc<Self>) {
        info!("Settlement sweep started (every {:?})", self.config.sweep_interval);
        let mut interval = tokio::time::interval(self.config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.sweep_once();
        }
    }

    /// Number of armed timers.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }
}
