//! Balance API
//!
//! - GET /api/balance?userId= - Current balance
//! - POST /api/accounts - Open an account with the starting balance

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::ApiResponse;
use crate::services::TradingError;
use crate::types::Account;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/balance", get(get_balance))
        .route("/accounts", post(open_account))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceQuery {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccountRequest {
    pub user_id: String,
}

/// GET /api/balance
async fn get_balance(
    State(state): State<AppState>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<ApiResponse<BalanceResponse>>, TradingError> {
    let balance = state.balances.balance(&query.user_id)?;
    Ok(Json(ApiResponse {
        data: BalanceResponse {
            user_id: query.user_id,
            balance,
        },
    }))
}

/// POST /api/accounts
///
/// Idempotent: an existing account is returned unchanged.
async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> Result<Json<ApiResponse<Account>>, TradingError> {
    let account = state.balances.open_account(&request.user_id)?;
    Ok(Json(ApiResponse { data: account }))
}
