//! Price Engine
//!
//! Produces the manipulated price of every enabled symbol on a fixed cadence.
//! One refresh task runs per enabled symbol and is the only writer of that
//! symbol's live prices. A supervisor reconciles the set of running tasks with
//! the registry so that enabling, disabling or deleting a symbol takes effect
//! without a restart.
//!
//! The numeric part is split out as pure functions over explicit random draws
//! ([`manipulate_price`], [`simulate_fallback`]) so it can be tested without a
//! feed, a clock or an RNG.

use crate::config::{FallbackMode, PriceEngineConfig};
use crate::services::{SqliteStore, SymbolRegistry};
use crate::sources::ReferenceFeed;
use crate::types::{PriceSample, PriceUpdate, SymbolConfig, Trend};
use dashmap::DashMap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Capacity of the price update channel.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// The three uniform draws in `[-1, 1]` one manipulated tick consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceDraws {
    pub manipulation: f64,
    pub trend: f64,
    pub volatility: f64,
}

impl PriceDraws {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            manipulation: rng.gen_range(-1.0..=1.0),
            trend: rng.gen_range(-1.0..=1.0),
            volatility: rng.gen_range(-1.0..=1.0),
        }
    }

    /// All draws at zero: the price moves by trend bias only.
    pub fn neutral() -> Self {
        Self {
            manipulation: 0.0,
            trend: 0.0,
            volatility: 0.0,
        }
    }
}

/// Round to cents.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Round to cents and floor at `min_price`. NaN and infinities collapse to
/// the floor.
pub fn finalize_price(value: f64, min_price: f64) -> f64 {
    let rounded = round2(value);
    if rounded.is_finite() && rounded >= min_price {
        rounded
    } else {
        min_price
    }
}

/// Manipulated price for `base` under the symbol's tunables.
///
/// `p0 = base * (1 + m * manipulation)`, then the trend bias
/// (`up: * (1 + bias)`, `down: * (1 - bias)`, `sideways: * (1 + t * bias / 2)`),
/// then the volatility jitter `* (1 + v * volatility / 100)`.
pub fn manipulate_price(base: f64, config: &SymbolConfig, draws: PriceDraws, min_price: f64) -> f64 {
    let p0 = base * (1.0 + draws.manipulation * config.manipulation_percentage);

    let p1 = match config.trend {
        Trend::Up => p0 * (1.0 + config.bias),
        Trend::Down => p0 * (1.0 - config.bias),
        Trend::Sideways => p0 * (1.0 + draws.trend * config.bias * 0.5),
    };

    let p2 = p1 * (1.0 + draws.volatility * config.volatility * 0.01);
    finalize_price(p2, min_price)
}

/// Next price when the feed is unavailable: the last manipulated price moved
/// by one volatility step in the trend direction (random sign when sideways).
pub fn simulate_fallback(last: f64, config: &SymbolConfig, draw: f64, min_price: f64) -> f64 {
    let step = config.volatility / 100.0;
    let next = match config.trend {
        Trend::Up => last * (1.0 + step),
        Trend::Down => last * (1.0 - step),
        Trend::Sideways => last * (1.0 + draw * step),
    };
    finalize_price(next, min_price)
}

/// Per-symbol price refresher and supervisor.
pub struct PriceEngine {
    registry: Arc<SymbolRegistry>,
    sqlite: Arc<SqliteStore>,
    feed: Arc<dyn ReferenceFeed>,
    config: PriceEngineConfig,
    /// Running refresh tasks (symbol_id -> task)
    tasks: DashMap<i64, JoinHandle<()>>,
    updates: broadcast::Sender<PriceUpdate>,
}

impl PriceEngine {
    pub fn new(
        registry: Arc<SymbolRegistry>,
        sqlite: Arc<SqliteStore>,
        feed: Arc<dyn ReferenceFeed>,
        config: PriceEngineConfig,
    ) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Arc::new(Self {
            registry,
            sqlite,
            feed,
            config,
            tasks: DashMap::new(),
            updates,
        })
    }

    /// Subscribe to published price updates.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceUpdate> {
        self.updates.subscribe()
    }

    pub fn feed_name(&self) -> &'static str {
        self.feed.name()
    }

    /// Run one refresh of a symbol: query the feed, compute the next price,
    /// publish it, persist the tick and broadcast it.
    ///
    /// Returns `None` when nothing was published (unknown or disabled symbol,
    /// or the feed was unavailable and the fallback holds). Callers treat that
    /// as "price unchanged".
    pub async fn refresh_symbol(&self, symbol_id: i64) -> Option<PriceUpdate> {
        let config = self.registry.get(symbol_id)?;
        if !config.enabled {
            return None;
        }

        let reference = self.feed.price(&config.ticker).await;
        let min_price = self.config.min_price;

        let (reference_price, manipulated_price, simulated) = match reference {
            Some(base) if base.is_finite() && base > 0.0 => {
                let draws = PriceDraws::sample(&mut rand::thread_rng());
                (base, manipulate_price(base, &config, draws, min_price), false)
            }
            _ => match self.config.fallback {
                FallbackMode::Hold => {
                    debug!("No reference price for {}, holding", config.ticker);
                    return None;
                }
                FallbackMode::Simulate => {
                    if !config.has_price() {
                        debug!("No reference price for {} and nothing to simulate from", config.ticker);
                        return None;
                    }
                    let draw = rand::thread_rng().gen_range(-1.0..=1.0);
                    let next = simulate_fallback(config.manipulated_price, &config, draw, min_price);
                    (config.reference_price, next, true)
                }
            },
        };

        let now = chrono::Utc::now();
        let at_ms = now.timestamp_millis();
        if !self
            .registry
            .publish_prices(symbol_id, reference_price, manipulated_price, at_ms)
        {
            return None;
        }

        let sample = PriceSample::new(symbol_id, now.timestamp(), manipulated_price, 0.0);
        if let Err(e) = self
            .sqlite
            .record_tick(&sample, reference_price, manipulated_price, at_ms)
        {
            warn!("Failed to persist tick for symbol {}: {}", symbol_id, e);
        }

        let update = PriceUpdate {
            symbol_id,
            reference_price,
            manipulated_price,
            timestamp: now.timestamp(),
            simulated,
        };
        // No subscribers is fine.
        let _ = self.updates.send(update.clone());
        Some(update)
    }

    /// Refresh loop of one symbol; runs until aborted.
    pub async fn run_symbol_loop(self: Arc<Self>, symbol_id: i64) {
        info!("Starting price refresh for symbol {}", symbol_id);
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            self.refresh_symbol(symbol_id).await;
        }
    }

    /// Start a refresh task for every enabled symbol that lacks one and abort
    /// the tasks of symbols that are gone or disabled. Returns the number of
    /// running tasks.
    pub fn reconcile(self: &Arc<Self>) -> usize {
        let enabled: HashSet<i64> = self.registry.enabled_ids().into_iter().collect();

        self.tasks.retain(|symbol_id, handle| {
            let keep = enabled.contains(symbol_id) && !handle.is_finished();
            if !keep {
                handle.abort();
                info!("Stopped price refresh for symbol {}", symbol_id);
            }
            keep
        });

        for symbol_id in enabled {
            self.tasks
                .entry(symbol_id)
                .or_insert_with(|| tokio::spawn(self.clone().run_symbol_loop(symbol_id)));
        }

        self.tasks.len()
    }

    /// Reconcile refresh tasks forever on the supervisor cadence.
    pub async fn run_supervisor(self: Arc<Self>) {
        info!(
            "Price engine supervisor started (feed: {}, refresh every {:?})",
            self.feed.name(),
            self.config.refresh_interval
        );
        let mut interval = tokio::time::interval(self.config.supervisor_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let running = self.reconcile();
            debug!("Price engine running {} refresh tasks", running);
        }
    }

    /// Ids of symbols with a running refresh task.
    pub fn running_symbols(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.tasks.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Abort every refresh task.
    pub fn shutdown(&self) {
        self.tasks.retain(|_, handle| {
            handle.abort();
            false
        });
    }
}
