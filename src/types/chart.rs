use chrono::{DateTime, NaiveTime};
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Candle bucket width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "15s")]
    FifteenSeconds,
    #[serde(rename = "30s")]
    ThirtySeconds,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    /// Calendar day aligned to UTC midnight.
    #[serde(rename = "1d")]
    OneDay,
}

impl Resolution {
    pub const ALL: [Resolution; 9] = [
        Resolution::FifteenSeconds,
        Resolution::ThirtySeconds,
        Resolution::OneMinute,
        Resolution::ThreeMinutes,
        Resolution::FiveMinutes,
        Resolution::FifteenMinutes,
        Resolution::ThirtyMinutes,
        Resolution::OneHour,
        Resolution::OneDay,
    ];

    /// Parse a resolution from either its label (`1m`, `1d`, `D`) or a plain
    /// number of seconds (`60`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        match s {
            "15s" => Some(Resolution::FifteenSeconds),
            "30s" => Some(Resolution::ThirtySeconds),
            "1m" => Some(Resolution::OneMinute),
            "3m" => Some(Resolution::ThreeMinutes),
            "5m" => Some(Resolution::FiveMinutes),
            "15m" => Some(Resolution::FifteenMinutes),
            "30m" => Some(Resolution::ThirtyMinutes),
            "1h" => Some(Resolution::OneHour),
            "1d" | "D" | "1D" => Some(Resolution::OneDay),
            _ => s
                .parse::<i64>()
                .ok()
                .and_then(|secs| Self::ALL.into_iter().find(|r| r.seconds() == secs)),
        }
    }

    /// Bucket width in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Resolution::FifteenSeconds => 15,
            Resolution::ThirtySeconds => 30,
            Resolution::OneMinute => 60,
            Resolution::ThreeMinutes => 180,
            Resolution::FiveMinutes => 300,
            Resolution::FifteenMinutes => 900,
            Resolution::ThirtyMinutes => 1800,
            Resolution::OneHour => 3600,
            Resolution::OneDay => SECONDS_PER_DAY,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resolution::FifteenSeconds => "15s",
            Resolution::ThirtySeconds => "30s",
            Resolution::OneMinute => "1m",
            Resolution::ThreeMinutes => "3m",
            Resolution::FiveMinutes => "5m",
            Resolution::FifteenMinutes => "15m",
            Resolution::ThirtyMinutes => "30m",
            Resolution::OneHour => "1h",
            Resolution::OneDay => "1d",
        }
    }

    /// Aligned start of the bucket containing `timestamp` (unix seconds).
    pub fn bucket_start(&self, timestamp: i64) -> i64 {
        match self {
            Resolution::OneDay => DateTime::from_timestamp(timestamp, 0)
                .map(|dt| dt.date_naive().and_time(NaiveTime::MIN).and_utc().timestamp())
                .unwrap_or_else(|| timestamp - timestamp.rem_euclid(SECONDS_PER_DAY)),
            _ => timestamp - timestamp.rem_euclid(self.seconds()),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One published price tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSample {
    pub symbol_id: i64,
    /// Unix seconds.
    pub timestamp: i64,
    pub price: f64,
    pub volume: f64,
}

impl PriceSample {
    pub fn new(symbol_id: i64, timestamp: i64, price: f64, volume: f64) -> Self {
        Self {
            symbol_id,
            timestamp,
            price,
            volume,
        }
    }
}

/// OHLCV summary of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub symbol_id: i64,
    /// Aligned bucket start, unix seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// `low <= open, close <= high`.
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// Candle query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandleSeries {
    pub symbol_id: i64,
    pub resolution: Resolution,
    pub candles: Vec<Candle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("15s"), Some(Resolution::FifteenSeconds));
        assert_eq!(Resolution::parse("60"), Some(Resolution::OneMinute));
        assert_eq!(Resolution::parse("900"), Some(Resolution::FifteenMinutes));
        assert_eq!(Resolution::parse("D"), Some(Resolution::OneDay));
        assert_eq!(Resolution::parse("45"), None);
        assert_eq!(Resolution::parse("2h"), None);
    }

    #[test]
    fn test_bucket_start_fixed_width() {
        assert_eq!(Resolution::OneMinute.bucket_start(0), 0);
        assert_eq!(Resolution::OneMinute.bucket_start(59), 0);
        assert_eq!(Resolution::OneMinute.bucket_start(61), 60);
        assert_eq!(Resolution::ThreeMinutes.bucket_start(1_700_000_123), 1_700_000_100);
        assert_eq!(Resolution::FifteenSeconds.bucket_start(-1), -15);
    }

    #[test]
    fn test_bucket_start_day_is_utc_midnight() {
        // 2024-03-10T17:45:12Z
        let t = 1_710_092_712;
        // 2024-03-10T00:00:00Z
        assert_eq!(Resolution::OneDay.bucket_start(t), 1_710_028_800);
        assert_eq!(Resolution::OneDay.bucket_start(1_710_028_800), 1_710_028_800);
    }

    #[test]
    fn test_resolution_serialization() {
        assert_eq!(serde_json::to_string(&Resolution::OneHour).unwrap(), "\"1h\"");
        let r: Resolution = serde_json::from_str("\"30s\"").unwrap();
        assert_eq!(r, Resolution::ThirtySeconds);
    }

    #[test]
    fn test_candle_consistency() {
        let candle = Candle {
            symbol_id: 1,
            time: 0,
            open: 10.0,
            high: 12.0,
            low: 9.0,
            close: 11.0,
            volume: 0.0,
        };
        assert!(candle.is_consistent());
        assert!(!Candle { high: 10.5, ..candle }.is_consistent());
    }
}
