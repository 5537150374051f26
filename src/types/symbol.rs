use serde::{Deserialize, Serialize};

/// Admin-selected drift applied to the manipulated price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    #[default]
    #[serde(alias = "volatile")]
    Sideways,
}

impl Trend {
    /// Parse a trend, accepting the legacy `volatile` spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Some(Trend::Up),
            "down" => Some(Trend::Down),
            "sideways" | "volatile" => Some(Trend::Sideways),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Sideways => "sideways",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tradable instrument with its admin tunables and last published prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolConfig {
    pub id: i64,
    /// Human name, e.g. `BTC/USDT`.
    pub name: String,
    /// Ticker understood by the reference feed, e.g. `BTCUSDT`.
    pub ticker: String,
    pub trend: Trend,
    /// Jitter amplitude in percent.
    pub volatility: f64,
    /// Drift applied per refresh, in [-1, 1].
    pub bias: f64,
    /// Noise amplitude around the reference price, in [0, 1].
    pub manipulation_percentage: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub payout_percent: f64,
    pub enabled: bool,
    /// Last price returned by the reference feed.
    pub reference_price: f64,
    /// Last price published by the engine (used for entry and exit).
    pub manipulated_price: f64,
    /// Millis of the last price publication, 0 if never published.
    pub price_updated_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SymbolConfig {
    /// Whether the engine has published at least one price for this symbol.
    pub fn has_price(&self) -> bool {
        self.manipulated_price > 0.0
    }

    /// Read both live prices as one unit.
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            symbol_id: self.id,
            name: self.name.clone(),
            reference_price: self.reference_price,
            manipulated_price: self.manipulated_price,
            updated_at: self.price_updated_at,
        }
    }

    /// Check tunables and trading bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        if self.ticker.trim().is_empty() {
            return Err("ticker is required".to_string());
        }
        if !self.volatility.is_finite() || self.volatility < 0.0 {
            return Err(format!("volatility must be >= 0, got {}", self.volatility));
        }
        if !self.bias.is_finite() || !(-1.0..=1.0).contains(&self.bias) {
            return Err(format!("bias must be within [-1, 1], got {}", self.bias));
        }
        if !self.manipulation_percentage.is_finite()
            || !(0.0..=1.0).contains(&self.manipulation_percentage)
        {
            return Err(format!(
                "manipulationPercentage must be within [0, 1], got {}",
                self.manipulation_percentage
            ));
        }
        if !self.min_amount.is_finite() || self.min_amount < 0.0 {
            return Err(format!("minAmount must be >= 0, got {}", self.min_amount));
        }
        if !self.max_amount.is_finite() || self.min_amount > self.max_amount {
            return Err(format!(
                "minAmount ({}) must not exceed maxAmount ({})",
                self.min_amount, self.max_amount
            ));
        }
        if !self.payout_percent.is_finite() || self.payout_percent < 0.0 {
            return Err(format!("payoutPercent must be >= 0, got {}", self.payout_percent));
        }
        Ok(())
    }

    /// Apply a partial admin edit. Live price fields are never touched here.
    pub fn apply(&mut self, update: &SymbolUpdate) {
        if let Some(ref name) = update.name {
            self.name = name.clone();
        }
        if let Some(ref ticker) = update.ticker {
            self.ticker = ticker.clone();
        }
        if let Some(trend) = update.trend {
            self.trend = trend;
        }
        if let Some(volatility) = update.volatility {
            self.volatility = volatility;
        }
        if let Some(bias) = update.bias {
            self.bias = bias;
        }
        if let Some(pct) = update.manipulation_percentage {
            self.manipulation_percentage = pct;
        }
        if let Some(min) = update.min_amount {
            self.min_amount = min;
        }
        if let Some(max) = update.max_amount {
            self.max_amount = max;
        }
        if let Some(payout) = update.payout_percent {
            self.payout_percent = payout;
        }
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
        }
    }
}

/// Request body for creating a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSymbolRequest {
    pub name: String,
    /// Defaults to `name` with `/` removed.
    pub ticker: Option<String>,
    #[serde(default)]
    pub trend: Trend,
    #[serde(default)]
    pub volatility: f64,
    #[serde(default)]
    pub bias: f64,
    #[serde(default)]
    pub manipulation_percentage: f64,
    pub min_amount: f64,
    pub max_amount: f64,
    pub payout_percent: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Seed price published until the first engine tick.
    pub current_price: Option<f64>,
}

fn default_enabled() -> bool {
    true
}

impl CreateSymbolRequest {
    /// Build the symbol row this request describes. The id is assigned on insert.
    pub fn into_config(self, now: i64) -> SymbolConfig {
        let ticker = self
            .ticker
            .unwrap_or_else(|| self.name.replace('/', ""))
            .to_uppercase();
        let seed = self
            .current_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(0.0);
        SymbolConfig {
            id: 0,
            name: self.name,
            ticker,
            trend: self.trend,
            volatility: self.volatility,
            bias: self.bias,
            manipulation_percentage: self.manipulation_percentage,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            payout_percent: self.payout_percent,
            enabled: self.enabled,
            reference_price: seed,
            manipulated_price: seed,
            price_updated_at: if seed > 0.0 { now } else { 0 },
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial admin edit of a symbol.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolUpdate {
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub trend: Option<Trend>,
    pub volatility: Option<f64>,
    pub bias: Option<f64>,
    pub manipulation_percentage: Option<f64>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub payout_percent: Option<f64>,
    pub enabled: Option<bool>,
}

/// Both live prices of a symbol captured together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub symbol_id: i64,
    pub name: String,
    pub reference_price: f64,
    pub manipulated_price: f64,
    pub updated_at: i64,
}

/// Published by the price engine after each refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub symbol_id: i64,
    pub reference_price: f64,
    pub manipulated_price: f64,
    /// Unix seconds.
    pub timestamp: i64,
    /// True when the feed was unavailable and the price was simulated.
    pub simulated: bool,
}
