use std::sync::Arc;
use std::time::Duration;
use tickwise::config::{Config, FeedKind};
use tickwise::services::SqliteStore;
use tickwise::sources::{BinanceFeed, OfflineFeed, ReferenceFeed};
use tickwise::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickwise=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("Starting Tickwise server on {}:{}", config.host, config.port);

    // Open the store
    let sqlite = if config.database_path == ":memory:" {
        Arc::new(SqliteStore::new_in_memory()?)
    } else {
        Arc::new(SqliteStore::new(&config.database_path)?)
    };
    info!("SQLite store opened at {}", config.database_path);

    // Reference feed
    let feed: Arc<dyn ReferenceFeed> = match config.reference_feed {
        FeedKind::Binance => Arc::new(BinanceFeed::new(
            Some(config.binance_api_url.clone()),
            Duration::from_millis(config.feed_timeout_ms),
        )),
        FeedKind::Offline => Arc::new(OfflineFeed),
    };
    info!(
        "Reference feed: {} (fallback {:?})",
        feed.name(),
        config.engine.fallback
    );

    let state = AppState::build(config.clone(), sqlite, feed)?;

    // Re-arm settlement for orders left open by a previous run
    let open_orders = state.ledger.load_open_orders()?;
    state.settlement.schedule_all(&open_orders);

    // Price updates -> WebSocket rooms
    tokio::spawn(state.room_manager.clone().run_fanout(state.engine.subscribe()));

    // Per-symbol refresh loops, kept in step with the registry
    tokio::spawn(state.engine.clone().run_supervisor());

    // Expired-order sweep
    tokio::spawn(state.settlement.clone().run_sweep());

    let app = tickwise::app(state);

    // Start the server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Tickwise server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
