use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::ApiResponse;
use crate::error::{AppError, Result};
use crate::services::load_candles;
use crate::types::{CandleSeries, Resolution};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/candles", get(get_candles))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleQuery {
    pub symbol_id: i64,
    /// `15s`..`1h`, `1d`, or a width in seconds. Defaults to one minute.
    pub resolution: Option<String>,
    /// Inclusive unix-second bounds; all retained history when omitted.
    pub from: Option<i64>,
    pub to: Option<i64>,
}

/// GET /api/candles
async fn get_candles(
    State(state): State<AppState>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<ApiResponse<CandleSeries>>> {
    let resolution = match query.resolution.as_deref() {
        None => Resolution::OneMinute,
        Some(r) => Resolution::parse(r)
            .ok_or_else(|| AppError::BadRequest(format!("Unsupported resolution '{}'", r)))?,
    };

    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::BadRequest(format!(
                "from ({}) is after to ({})",
                from, to
            )));
        }
    }

    if state.registry.get(query.symbol_id).is_none() {
        return Err(AppError::NotFound(format!("Symbol {}", query.symbol_id)));
    }

    let series = load_candles(&state.sqlite, query.symbol_id, resolution, query.from, query.to)?;
    Ok(Json(ApiResponse { data: series }))
}
