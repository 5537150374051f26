//! Tick-to-candle aggregation.
//!
//! [`CandleAggregator`] wraps any time-ordered iterator of [`PriceSample`]s and
//! lazily yields one [`Candle`] per non-empty bucket. It never inserts empty
//! candles for gaps. The aggregator is `Clone` whenever its source is, so a
//! caller holding a clonable source can restart the sequence from the top.
//!
//! Each candle opens at the first tick of its own bucket; the previous
//! bucket's close is not carried forward.

use crate::services::SqliteStore;
use crate::types::{Candle, CandleSeries, PriceSample, Resolution};
use tracing::debug;

/// Running OHLCV state of the bucket currently being filled.
#[derive(Debug, Clone)]
struct OhlcBucket {
    time: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl OhlcBucket {
    fn new(time: i64, price: f64, volume: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    fn update(&mut self, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
    }

    fn to_candle(&self, symbol_id: i64) -> Candle {
        Candle {
            symbol_id,
            time: self.time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// Lazy OHLCV aggregation over an ascending stream of ticks.
#[derive(Debug, Clone)]
pub struct CandleAggregator<I> {
    samples: I,
    resolution: Resolution,
    symbol_id: Option<i64>,
    current: Option<OhlcBucket>,
    /// Ticks dropped because they arrived behind the open bucket.
    skipped: usize,
}

impl<I> CandleAggregator<I>
where
    I: Iterator<Item = PriceSample>,
{
    pub fn new<S>(samples: S, resolution: Resolution) -> Self
    where
        S: IntoIterator<IntoIter = I>,
    {
        Self {
            samples: samples.into_iter(),
            resolution,
            symbol_id: None,
            current: None,
            skipped: 0,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Ticks ignored so far because their bucket preceded the open one.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl<I> Iterator for CandleAggregator<I>
where
    I: Iterator<Item = PriceSample>,
{
    type Item = Candle;

    fn next(&mut self) -> Option<Candle> {
        for sample in self.samples.by_ref() {
            let bucket_time = self.resolution.bucket_start(sample.timestamp);
            let symbol_id = *self.symbol_id.get_or_insert(sample.symbol_id);

            match self.current.as_mut() {
                Some(bucket) if bucket.time == bucket_time => {
                    bucket.update(sample.price, sample.volume);
                }
                Some(bucket) if bucket_time < bucket.time => {
                    // Emitting it would break strictly increasing candle times.
                    self.skipped += 1;
                    debug!(
                        "Skipping out-of-order tick at {} (open bucket {})",
                        sample.timestamp, bucket.time
                    );
                }
                Some(_) => {
                    let next = OhlcBucket::new(bucket_time, sample.price, sample.volume);
                    let finished = self.current.replace(next);
                    return finished.map(|b| b.to_candle(symbol_id));
                }
                None => {
                    self.current = Some(OhlcBucket::new(bucket_time, sample.price, sample.volume));
                }
            }
        }

        let symbol_id = self.symbol_id.unwrap_or_default();
        self.current.take().map(|b| b.to_candle(symbol_id))
    }
}

/// Collect every candle of `samples` at `resolution`.
pub fn aggregate<S>(samples: S, resolution: Resolution) -> Vec<Candle>
where
    S: IntoIterator<Item = PriceSample>,
{
    CandleAggregator::new(samples, resolution).collect()
}

/// Candles of a symbol built from its retained ticks with timestamps in
/// `[from, to]` (unbounded ends when `None`).
pub fn load_candles(
    sqlite: &SqliteStore,
    symbol_id: i64,
    resolution: Resolution,
    from: Option<i64>,
    to: Option<i64>,
) -> Result<CandleSeries, rusqlite::Error> {
    let samples = sqlite.get_samples(symbol_id, from, to)?;
    let sample_count = samples.len();
    let candles = aggregate(samples, resolution);
    debug!(
        "Built {} {} candles for symbol {} from {} ticks",
        candles.len(),
        resolution.label(),
        symbol_id,
        sample_count
    );

    Ok(CandleSeries {
        symbol_id,
        resolution,
        candles,
    })
}
