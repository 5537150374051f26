use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    feed: &'static str,
    symbols: usize,
    price_loops: usize,
    open_orders: usize,
    stream_clients: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        feed: state.engine.feed_name(),
        symbols: state.registry.list().len(),
        price_loops: state.engine.running_symbols().len(),
        open_orders: state.ledger.open_order_count(),
        stream_clients: state.room_manager.client_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}
