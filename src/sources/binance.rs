use crate::sources::ReferenceFeed;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const BINANCE_API_URL: &str = "https://api.binance.com/api/v3";
/// Longest slice of an error body carried into logs.
const ERROR_BODY_CHARS: usize = 200;

/// Binance `ticker/price` response.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// Binance REST reference feed.
#[derive(Clone)]
pub struct BinanceFeed {
    client: Client,
    base_url: String,
}

impl BinanceFeed {
    /// Create a new Binance feed. Each request is bounded by `timeout`.
    pub fn new(base_url: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .user_agent("Tickwise/1.0")
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url
                .unwrap_or_else(|| BINANCE_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        }
    }

    async fn fetch_price(&self, ticker: &str) -> anyhow::Result<f64> {
        let url = format!("{}/ticker/price", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbol", ticker.to_ascii_uppercase())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "Binance API returned {}: {}",
                status,
                truncate_body(&text, ERROR_BODY_CHARS)
            ));
        }

        let ticker: TickerPrice = response.json().await?;
        parse_price(&ticker)
    }
}

/// First `max_chars` characters of `text`, cut on a char boundary.
fn truncate_body(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

fn parse_price(ticker: &TickerPrice) -> anyhow::Result<f64> {
    let price: f64 = ticker
        .price
        .parse()
        .map_err(|_| anyhow::anyhow!("Unparseable price '{}' for {}", ticker.price, ticker.symbol))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(anyhow::anyhow!("Non-positive price {} for {}", price, ticker.symbol));
    }
    Ok(price)
}

#[async_trait]
impl ReferenceFeed for BinanceFeed {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn price(&self, ticker: &str) -> Option<f64> {
        match self.fetch_price(ticker).await {
            Ok(price) => {
                debug!("Binance {} = {}", ticker, price);
                Some(price)
            }
            Err(e) => {
                warn!("Binance price unavailable for {}: {}", ticker, e);
                None
            }
        }
    }
}
