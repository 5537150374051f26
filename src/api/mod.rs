pub mod balance;
pub mod candles;
pub mod health;
pub mod orders;
pub mod symbols;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// Envelope of every successful JSON response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest(
            "/api",
            Router::new()
                .merge(symbols::router())
                .merge(candles::router())
                .merge(orders::router())
                .merge(balance::router()),
        )
        .nest("/api/admin", symbols::admin_router())
}
