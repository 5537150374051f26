//! Reference price feeds.
//!
//! A feed answers "what is the real-world price of this ticker right now".
//! An unavailable price is an ordinary outcome (`None`), never an error: the
//! price engine decides what to do with a missing tick.

pub mod binance;

pub use binance::BinanceFeed;

use async_trait::async_trait;
use dashmap::DashMap;

/// Source of real-world reference prices.
#[async_trait]
pub trait ReferenceFeed: Send + Sync {
    /// Feed name for logs.
    fn name(&self) -> &'static str;

    /// Latest price of `ticker`, or `None` if the feed cannot provide one.
    async fn price(&self, ticker: &str) -> Option<f64>;
}

/// Feed that never has a price. Every tick goes through the fallback path.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFeed;

#[async_trait]
impl ReferenceFeed for OfflineFeed {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn price(&self, _ticker: &str) -> Option<f64> {
        None
    }
}

/// Feed backed by prices set in process (tickers are matched case-insensitively).
#[derive(Debug, Default)]
pub struct ManualFeed {
    prices: DashMap<String, f64>,
}

impl ManualFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, ticker: &str, price: f64) {
        self.prices.insert(ticker.to_ascii_uppercase(), price);
    }

    pub fn clear(&self, ticker: &str) {
        self.prices.remove(&ticker.to_ascii_uppercase());
    }
}

#[async_trait]
impl ReferenceFeed for ManualFeed {
    fn name(&self) -> &'static str {
        "manual"
    }

    async fn price(&self, ticker: &str) -> Option<f64> {
        self.prices.get(&ticker.to_ascii_uppercase()).map(|p| *p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_feed_has_no_prices() {
        assert_eq!(OfflineFeed.price("BTCUSDT").await, None);
    }

    #[tokio::test]
    async fn test_manual_feed() {
        let feed = ManualFeed::new();
        assert_eq!(feed.price("btcusdt").await, None);

        feed.set_price("BTCUSDT", 50_000.0);
        assert_eq!(feed.price("btcusdt").await, Some(50_000.0));

        feed.clear("BtcUsdt");
        assert_eq!(feed.price("BTCUSDT").await, None);
    }

    #[test]
    fn test_feeds_behind_trait_object() {
        let manual = ManualFeed::new();
        manual.set_price("ETHUSDT", 3_000.0);
        let feeds: Vec<Box<dyn ReferenceFeed>> = vec![Box::new(OfflineFeed), Box::new(manual)];

        let prices: Vec<Option<f64>> = feeds
            .iter()
            .map(|feed| tokio_test::block_on(feed.price("ETHUSDT")))
            .collect();
        assert_eq!(prices, vec![None, Some(3_000.0)]);
        assert_eq!(feeds[1].name(), "manual");
    }
}
