//! Tickwise - binary-options trading simulator
//!
//! A price engine publishes a manipulated price per symbol on top of a
//! reference feed, ticks are folded into OHLC candles on demand, and
//! fixed-payout up/down orders are placed against an account balance and
//! settled at expiry.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;
pub mod websocket;

use axum::{routing::get, Router};
use config::Config;
use services::{
    BalanceLedger, OrderLedger, PriceEngine, SettlementScheduler, SqliteStore, SymbolRegistry,
};
use sources::ReferenceFeed;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use websocket::RoomManager;

// Re-export commonly used types
pub use types::*;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sqlite: Arc<SqliteStore>,
    pub registry: Arc<SymbolRegistry>,
    pub engine: Arc<PriceEngine>,
    pub balances: Arc<BalanceLedger>,
    pub ledger: Arc<OrderLedger>,
    pub settlement: Arc<SettlementScheduler>,
    pub room_manager: Arc<RoomManager>,
}

impl AppState {
    /// Wire every service on top of an opened store. Nothing is spawned.
    pub fn build(
        config: Arc<Config>,
        sqlite: Arc<SqliteStore>,
        feed: Arc<dyn ReferenceFeed>,
    ) -> anyhow::Result<Self> {
        let registry = SymbolRegistry::load(sqlite.clone())?;
        let engine = PriceEngine::new(
            registry.clone(),
            sqlite.clone(),
            feed,
            config.engine.clone(),
        );
        let balances = Arc::new(BalanceLedger::new(
            sqlite.clone(),
            config.settlement.starting_balance,
        ));
        let ledger = Arc::new(OrderLedger::new(
            registry.clone(),
            sqlite.clone(),
            balances.clone(),
            config.settlement.clone(),
        ));
        let settlement = SettlementScheduler::new(ledger.clone(), config.settlement.clone());

        Ok(Self {
            config,
            sqlite,
            registry,
            engine,
            balances,
            ledger,
            settlement,
            room_manager: RoomManager::new(),
        })
    }
}

/// Build the HTTP + WebSocket application.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::router())
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
