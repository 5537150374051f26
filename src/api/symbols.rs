//! Symbol API
//!
//! Public:
//! - GET /api/symbols - Enabled symbols with their live price
//! - GET /api/symbols/:id/price - Reference and manipulated price snapshot
//!
//! Admin:
//! - GET /api/admin/symbols?page=&limit= - Paginated list with total count
//! - POST /api/admin/symbols - Create a symbol
//! - GET /api/admin/symbols/:id - Full configuration
//! - PATCH /api/admin/symbols/:id - Partial update of tunables and bounds
//! - DELETE /api/admin/symbols/:id - Delete (refused while orders are open)
//! - DELETE /api/admin/symbols/:id/samples?before= - Purge retained ticks

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{CreateSymbolRequest, PriceSnapshot, SymbolConfig, SymbolUpdate};
use crate::AppState;

const DEFAULT_PAGE_LIMIT: usize = 20;
const MAX_PAGE_LIMIT: usize = 100;

/// Public symbol routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/symbols", get(list_symbols))
        .route("/symbols/:id/price", get(get_price))
}

/// Admin symbol routes.
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/symbols", get(admin_list_symbols).post(create_symbol))
        .route(
            "/symbols/:id",
            get(admin_get_symbol).patch(update_symbol).delete(delete_symbol),
        )
        .route("/symbols/:id/samples", delete(purge_samples))
}

// =============================================================================
// Response Types
// =============================================================================

/// What traders see of a symbol; tunables stay admin-only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolSummary {
    pub id: i64,
    pub name: String,
    pub ticker: String,
    pub min_amount: f64,
    pub max_amount: f64,
    pub payout_percent: f64,
    pub price: f64,
    pub price_updated_at: i64,
}

impl From<SymbolConfig> for SymbolSummary {
    fn from(s: SymbolConfig) -> Self {
        Self {
            id: s.id,
            name: s.name,
            ticker: s.ticker,
            min_amount: s.min_amount,
            max_amount: s.max_amount,
            payout_percent: s.payout_percent,
            price: s.manipulated_price,
            price_updated_at: s.price_updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolPage {
    pub symbols: Vec<SymbolConfig>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: i64,
}

#[derive(Debug, Serialize)]
pub struct PurgeResponse {
    pub removed: usize,
}

// =============================================================================
// Query Parameters
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    /// Unix seconds; ticks strictly older are removed. All ticks when omitted.
    pub before: Option<i64>,
}

// =============================================================================
// Public Handlers
// =============================================================================

/// GET /api/symbols
async fn list_symbols(State(state): State<AppState>) -> Json<ApiResponse<Vec<SymbolSummary>>> {
    let symbols = state
        .registry
        .list_enabled()
        .into_iter()
        .map(SymbolSummary::from)
        .collect();
    Json(ApiResponse { data: symbols })
}

/// GET /api/symbols/:id/price
async fn get_price(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<PriceSnapshot>>> {
    let snapshot = state
        .registry
        .snapshot(id)
        .ok_or_else(|| AppError::NotFound(format!("Symbol {}", id)))?;
    Ok(Json(ApiResponse { data: snapshot }))
}

// =============================================================================
// Admin Handlers
// =============================================================================

/// GET /api/admin/symbols
async fn admin_list_symbols(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Json<ApiResponse<SymbolPage>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);
    let (symbols, total) = state.registry.list_page(page, limit);

    Json(ApiResponse {
        data: SymbolPage {
            symbols,
            total,
            page,
            limit,
        },
    })
}

/// POST /api/admin/symbols
async fn create_symbol(
    State(state): State<AppState>,
    Json(request): Json<CreateSymbolRequest>,
) -> Result<Json<ApiResponse<SymbolConfig>>> {
    let symbol = state.registry.create(request)?;
    state.engine.reconcile();
    Ok(Json(ApiResponse { data: symbol }))
}

/// GET /api/admin/symbols/:id
async fn admin_get_symbol(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<SymbolConfig>>> {
    let symbol = state
        .registry
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("Symbol {}", id)))?;
    Ok(Json(ApiResponse { data: symbol }))
}

/// PATCH /api/admin/symbols/:id
async fn update_symbol(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<SymbolUpdate>,
) -> Result<Json<ApiResponse<SymbolConfig>>> {
    let symbol = state.registry.update(id, update)?;
    state.engine.reconcile();
    Ok(Json(ApiResponse { data: symbol }))
}

/// DELETE /api/admin/symbols/:id
async fn delete_symbol(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<DeleteResponse>>> {
    state.registry.delete(id)?;
    state.engine.reconcile();
    Ok(Json(ApiResponse {
        data: DeleteResponse { deleted: true, id },
    }))
}

/// DELETE /api/admin/symbols/:id/samples
async fn purge_samples(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<PurgeQuery>,
) -> Result<Json<ApiResponse<PurgeResponse>>> {
    if state.registry.get(id).is_none() {
        return Err(AppError::NotFound(format!("Symbol {}", id)));
    }

    let removed = state.sqlite.purge_samples(id, query.before)?;
    info!("Purged {} ticks of symbol {} (before {:?})", removed, id, query.before);
    Ok(Json(ApiResponse {
        data: PurgeResponse { removed },
    }))
}
