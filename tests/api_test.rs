//! HTTP endpoints against an in-memory store and an offline feed.

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tickwise::config::{Config, FallbackMode};
use tickwise::services::SqliteStore;
use tickwise::sources::OfflineFeed;
use tickwise::{app, AppState};
use tower::ServiceExt;

fn test_app() -> (Router, AppState) {
    let mut config = Config::default();
    config.settlement.starting_balance = 100.0;
    config.engine.fallback = FallbackMode::Hold;

    let sqlite = Arc::new(SqliteStore::new_in_memory().unwrap());
    let state = AppState::build(Arc::new(config), sqlite, Arc::new(OfflineFeed)).unwrap();
    (app(state.clone()), state)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_symbol(app: &Router) -> i64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/admin/symbols",
        Some(json!({
            "name": "BTC/USDT",
            "trend": "up",
            "volatility": 0.5,
            "bias": 0.01,
            "manipulationPercentage": 0.05,
            "minAmount": 1,
            "maxAmount": 1000,
            "payoutPercent": 80,
            "currentPrice": 100.0
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health() {
    let (app, _) = test_app();
    let (status, body) = call(&app, Method::GET, "/api/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["feed"], "offline");
    assert_eq!(body["openOrders"], 0);
}

#[tokio::test]
async fn test_symbol_admin_lifecycle() {
    let (app, state) = test_app();
    let id = create_symbol(&app).await;

    let (status, body) = call(&app, Method::GET, "/api/symbols", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["ticker"], "BTCUSDT");
    assert_eq!(body["data"][0]["price"], 100.0);

    let (status, body) = call(&app, Method::GET, &format!("/api/symbols/{id}/price"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["manipulatedPrice"], 100.0);

    let (status, body) = call(
        &app,
        Method::PATCH,
        &format!("/api/admin/symbols/{id}"),
        Some(json!({ "enabled": false, "payoutPercent": 90 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(body["data"]["payoutPercent"], 90.0);

    // Disabled symbols are hidden from traders and get no refresh loop.
    let (_, body) = call(&app, Method::GET, "/api/symbols", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
    assert!(state.engine.running_symbols().is_empty());

    let (status, body) = call(&app, Method::GET, "/api/admin/symbols?page=1&limit=500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["limit"], 100);

    let (status, _) = call(&app, Method::DELETE, &format!("/api/admin/symbols/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&app, Method::GET, &format!("/api/admin/symbols/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 404);

    state.engine.shutdown();
}

#[tokio::test]
async fn test_invalid_symbol_is_rejected() {
    let (app, _) = test_app();
    let (status, _) = call(
        &app,
        Method::POST,
        "/api/admin/symbols",
        Some(json!({
            "name": "BAD",
            "minAmount": 10,
            "maxAmount": 1,
            "payoutPercent": 80
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_order_flow() {
    let (app, state) = test_app();
    let symbol_id = create_symbol(&app).await;

    let (status, body) = call(&app, Method::POST, "/api/accounts", Some(json!({ "userId": "alice" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["balance"], 100.0);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/orders",
        Some(json!({
            "userId": "alice",
            "symbolId": symbol_id,
            "amount": 40,
            "direction": "up",
            "duration": 30
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let order_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["manipulatedEntryPrice"], 100.0);
    assert!(body["data"]["outcome"].is_null());
    assert_eq!(state.settlement.pending_timers(), 1);

    let (_, body) = call(&app, Method::GET, "/api/balance?userId=alice", None).await;
    assert_eq!(body["data"]["balance"], 60.0);

    let (status, body) = call(&app, Method::GET, "/api/orders?userId=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, body) = call(&app, Method::GET, &format!("/api/orders/{order_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["userId"], "alice");

    let (_, body) = call(&app, Method::GET, "/api/trades?userId=alice", None).await;
    assert_eq!(body["data"]["openTrades"].as_array().unwrap().len(), 1);

    // Symbols with open orders cannot be deleted.
    let (status, _) = call(&app, Method::DELETE, &format!("/api/admin/symbols/{symbol_id}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    state.engine.shutdown();
}

#[tokio::test]
async fn test_order_errors_carry_codes() {
    let (app, state) = test_app();
    let symbol_id = create_symbol(&app).await;
    call(&app, Method::POST, "/api/accounts", Some(json!({ "userId": "bob" }))).await;

    let cases = [
        (json!({ "userId": "bob", "symbolId": 999, "amount": 10, "direction": "up", "duration": 30 }),
            StatusCode::NOT_FOUND, "SYMBOL_NOT_FOUND"),
        (json!({ "userId": "bob", "symbolId": symbol_id, "amount": 5000, "direction": "up", "duration": 30 }),
            StatusCode::BAD_REQUEST, "AMOUNT_OUT_OF_RANGE"),
        (json!({ "userId": "bob", "symbolId": symbol_id, "amount": 10, "direction": "sideways", "duration": 30 }),
            StatusCode::BAD_REQUEST, "INVALID_DIRECTION"),
        (json!({ "userId": "bob", "symbolId": symbol_id, "amount": 500, "direction": "up", "duration": 30 }),
            StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE"),
        (json!({ "userId": "carol", "symbolId": symbol_id, "amount": 10, "direction": "up", "duration": 30 }),
            StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
    ];

    for (request, expected_status, expected_code) in cases {
        let (status, body) = call(&app, Method::POST, "/api/orders", Some(request)).await;
        assert_eq!(status, expected_status, "{body}");
        assert_eq!(body["code"], expected_code);
    }

    let (_, body) = call(&app, Method::GET, "/api/balance?userId=bob", None).await;
    assert_eq!(body["data"]["balance"], 100.0);

    state.engine.shutdown();
}

#[tokio::test]
async fn test_candles_endpoint() {
    let (app, state) = test_app();
    let symbol_id = create_symbol(&app).await;
    state
        .sqlite
        .insert_samples(&[
            tickwise::types::PriceSample::new(symbol_id, 0, 10.0, 0.0),
            tickwise::types::PriceSample::new(symbol_id, 5, 12.0, 0.0),
            tickwise::types::PriceSample::new(symbol_id, 61, 11.0, 0.0),
        ])
        .unwrap();

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/candles?symbolId={symbol_id}&resolution=60"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let candles = body["data"]["candles"].as_array().unwrap();
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0]["high"], 12.0);
    assert_eq!(candles[1]["time"], 60);

    let (status, _) = call(
        &app,
        Method::GET,
        &format!("/api/candles?symbolId={symbol_id}&resolution=2m"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&app, Method::GET, "/api/candles?symbolId=42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    state.engine.shutdown();
}
