//! Trading API
//!
//! - POST /api/orders - Place a binary order
//! - GET /api/orders?userId=&status=open|settling|historical - List a user's orders
//! - GET /api/orders/:id - Get order details
//! - GET /api/trades?userId= - Open trades plus the most recent closed ones

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::ApiResponse;
use crate::services::TradingError;
use crate::types::{Order, OrderStatus, PlaceOrderRequest, TradesOverview};
use crate::AppState;

/// Create trading router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders).post(place_order))
        .route("/orders/:id", get(get_order))
        .route("/trades", get(list_trades))
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Convert TradingError to HTTP response.
impl IntoResponse for TradingError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            TradingError::SymbolNotFound(_) => (StatusCode::NOT_FOUND, "SYMBOL_NOT_FOUND"),
            TradingError::SymbolDisabled(_) => (StatusCode::BAD_REQUEST, "SYMBOL_DISABLED"),
            TradingError::AmountOutOfRange { .. } => {
                (StatusCode::BAD_REQUEST, "AMOUNT_OUT_OF_RANGE")
            }
            TradingError::InvalidDirection(_) => (StatusCode::BAD_REQUEST, "INVALID_DIRECTION"),
            TradingError::InvalidOrder(_) => (StatusCode::BAD_REQUEST, "INVALID_ORDER"),
            TradingError::InsufficientBalance { .. } => {
                (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
            }
            TradingError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            TradingError::OrderNotFound(_) => (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND"),
            TradingError::NoPriceData(_) => (StatusCode::SERVICE_UNAVAILABLE, "NO_PRICE_DATA"),
            TradingError::DatabaseError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR")
            }
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

// =============================================================================
// Query Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub user_id: String,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTradesQuery {
    pub user_id: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /api/orders
///
/// Validates, debits the stake and records the order, then arms its
/// settlement timer.
async fn place_order(
    State(state): State<AppState>,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Json<ApiResponse<Order>>, TradingError> {
    let order = state.ledger.place_order(request)?;
    state.settlement.schedule(&order);
    Ok(Json(ApiResponse { data: order }))
}

/// GET /api/orders
///
/// Status defaults to `open`.
async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<ApiResponse<Vec<Order>>>, TradingError> {
    let status = match query.status.as_deref() {
        None => OrderStatus::Open,
        Some(s) => OrderStatus::parse(&s.to_ascii_lowercase())
            .ok_or_else(|| TradingError::InvalidOrder(format!("Unknown status '{}'", s)))?,
    };

    let now_ms = chrono::Utc::now().timestamp_millis();
    let orders = state
        .ledger
        .list_orders(&query.user_id, status, now_ms, query.limit)?;

    Ok(Json(ApiResponse { data: orders }))
}

/// GET /api/orders/:id
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Order>>, TradingError> {
    let order = state.ledger.get_order(&id)?;
    Ok(Json(ApiResponse { data: order }))
}

/// GET /api/trades
async fn list_trades(
    State(state): State<AppState>,
    Query(query): Query<ListTradesQuery>,
) -> Result<Json<ApiResponse<TradesOverview>>, TradingError> {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let overview = state.ledger.trades_overview(&query.user_id, now_ms)?;
    Ok(Json(ApiResponse { data: overview }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (TradingError::SymbolNotFound(1), StatusCode::NOT_FOUND),
            (TradingError::SymbolDisabled(1), StatusCode::BAD_REQUEST),
            (
                TradingError::InsufficientBalance {
                    needed: 10.0,
                    available: 5.0,
                },
                StatusCode::BAD_REQUEST,
            ),
            (TradingError::NoPriceData(1), StatusCode::SERVICE_UNAVAILABLE),
            (TradingError::DatabaseError("locked".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_list_orders_query_is_camel_case() {
        let query: ListOrdersQuery =
            serde_urlencoded::from_str("userId=alice&status=settling&limit=5").unwrap();
        assert_eq!(query.user_id, "alice");
        assert_eq!(query.status.as_deref(), Some("settling"));
        assert_eq!(query.limit, Some(5));
    }
}
