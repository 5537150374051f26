use std::env;
use std::time::Duration;

/// Which reference feed drives the price engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    /// Binance public REST ticker.
    Binance,
    /// No external feed; every tick goes through the fallback path.
    Offline,
}

impl FeedKind {
    fn from_env_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "offline" | "none" => FeedKind::Offline,
            _ => FeedKind::Binance,
        }
    }
}

/// What the engine does when the reference feed has no price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Skip the tick; the published price stays unchanged.
    Hold,
    /// Move the last manipulated price along the symbol's trend.
    Simulate,
}

impl FallbackMode {
    fn from_env_value(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "simulate" | "simulated" => FallbackMode::Simulate,
            _ => FallbackMode::Hold,
        }
    }
}

/// Price engine configuration.
#[derive(Debug, Clone)]
pub struct PriceEngineConfig {
    /// Per-symbol refresh cadence.
    pub refresh_interval: Duration,
    /// How often running refresh loops are reconciled with the registry.
    pub supervisor_interval: Duration,
    /// Behaviour when the feed is unavailable.
    pub fallback: FallbackMode,
    /// Strictly positive floor for every published price.
    pub min_price: f64,
}

impl Default for PriceEngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(1000),
            supervisor_interval: Duration::from_secs(5),
            fallback: FallbackMode::Hold,
            min_price: 0.01,
        }
    }
}

/// Settlement and order-placement configuration.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Cadence of the expired-order sweep.
    pub sweep_interval: Duration,
    /// Orders unresolved this long past expiry are reported by the sweep.
    pub stale_after: Duration,
    /// Upper bound on an order's duration, in seconds.
    pub max_order_duration_secs: i64,
    /// Balance granted when an account is opened.
    pub starting_balance: f64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(60),
            max_order_duration_secs: 86_400,
            starting_balance: 0.0,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite database path (`:memory:` for a throwaway store).
    pub database_path: String,
    /// Reference feed selection.
    pub reference_feed: FeedKind,
    /// Binance REST base URL.
    pub binance_api_url: String,
    /// Per-request feed timeout (ms).
    pub feed_timeout_ms: u64,
    /// Price engine settings.
    pub engine: PriceEngineConfig,
    /// Settlement settings.
    pub settlement: SettlementConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let engine_defaults = PriceEngineConfig::default();
        let settlement_defaults = SettlementConfig::default();

        let min_price = env_parse::<f64>("MIN_PRICE")
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(engine_defaults.min_price);

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("PORT").unwrap_or(3001),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "tickwise.db".to_string()),
            reference_feed: env::var("REFERENCE_FEED")
                .map(|v| FeedKind::from_env_value(&v))
                .unwrap_or(FeedKind::Binance),
            binance_api_url: env::var("BINANCE_API_URL")
                .unwrap_or_else(|_| "https://api.binance.com/api/v3".to_string()),
            feed_timeout_ms: env_parse("FEED_TIMEOUT_MS").unwrap_or(2000),
            engine: PriceEngineConfig {
                refresh_interval: env_parse("PRICE_REFRESH_MS")
                    .filter(|ms| *ms > 0)
                    .map(Duration::from_millis)
                    .unwrap_or(engine_defaults.refresh_interval),
                supervisor_interval: env_parse("SUPERVISOR_INTERVAL_SECS")
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(engine_defaults.supervisor_interval),
                fallback: env::var("FEED_FALLBACK")
                    .map(|v| FallbackMode::from_env_value(&v))
                    .unwrap_or(engine_defaults.fallback),
                min_price,
            },
            settlement: SettlementConfig {
                sweep_interval: env_parse("SETTLEMENT_SWEEP_SECS")
                    .filter(|s| *s > 0)
                    .map(Duration::from_secs)
                    .unwrap_or(settlement_defaults.sweep_interval),
                stale_after: env_parse("SETTLEMENT_STALE_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(settlement_defaults.stale_after),
                max_order_duration_secs: env_parse("MAX_ORDER_DURATION_SECS")
                    .filter(|s| *s > 0)
                    .unwrap_or(settlement_defaults.max_order_duration_secs),
                starting_balance: env_parse::<f64>("STARTING_BALANCE")
                    .filter(|b| b.is_finite() && *b >= 0.0)
                    .unwrap_or(settlement_defaults.starting_balance),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Enum parsing
    // =========================================================================

    #[test]
    fn test_feed_kind_from_env_value() {
        assert_eq!(FeedKind::from_env_value("offline"), FeedKind::Offline);
        assert_eq!(FeedKind::from_env_value("NONE"), FeedKind::Offline);
        assert_eq!(FeedKind::from_env_value("binance"), FeedKind::Binance);
        assert_eq!(FeedKind::from_env_value("anything"), FeedKind::Binance);
    }

    #[test]
    fn test_fallback_mode_from_env_value() {
        assert_eq!(FallbackMode::from_env_value("simulate"), FallbackMode::Simulate);
        assert_eq!(FallbackMode::from_env_value("hold"), FallbackMode::Hold);
        assert_eq!(FallbackMode::from_env_value(""), FallbackMode::Hold);
    }

    // =========================================================================
    // Defaults
    // =========================================================================

    #[test]
    fn test_engine_defaults() {
        let engine = PriceEngineConfig::default();
        assert_eq!(engine.refresh_interval, Duration::from_secs(1));
        assert_eq!(engine.fallback, FallbackMode::Hold);
        assert!(engine.min_price > 0.0);
    }

    #[test]
    fn test_settlement_defaults() {
        let settlement = SettlementConfig::default();
        assert_eq!(settlement.sweep_interval, Duration::from_secs(5));
        assert_eq!(settlement.max_order_duration_secs, 86_400);
        assert_eq!(settlement.starting_balance, 0.0);
    }

    #[test]
    fn test_config_clone() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            database_path: ":memory:".to_string(),
            reference_feed: FeedKind::Offline,
            binance_api_url: "http://localhost".to_string(),
            feed_timeout_ms: 500,
            engine: PriceEngineConfig::default(),
            settlement: SettlementConfig::default(),
        };

        let cloned = config.clone();
        assert_eq!(cloned.host, config.host);
        assert_eq!(cloned.port, 8080);
        assert_eq!(cloned.reference_feed, FeedKind::Offline);
    }
}
