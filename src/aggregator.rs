//! OHLCV candle aggregator.
//!
//! Ported from `CandleBuilder`/`CandleAggregator` in the stream-processor
//! service: time-bucketed aggregation across several intervals at once,
//! flush-on-bucket-change, and a periodic `flush_completed` sweep for
//! buckets nobody traded into after their window closed.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error};

use crate::error::FinStreamError;
use crate::models::{Candle, Interval, Trade};
use crate::timeseries::TimeseriesRepository;

fn bucket_start(timestamp: DateTime<Utc>, interval: Interval) -> DateTime<Utc> {
    let seconds = interval.seconds();
    let epoch = timestamp.timestamp();
    let bucket_epoch = (epoch.div_euclid(seconds)) * seconds;
    Utc.timestamp_opt(bucket_epoch, 0).unwrap()
}

#[derive(Debug, Clone)]
struct CandleBuilder {
    symbol: String,
    interval: Interval,
    bucket_start: DateTime<Utc>,
    open: Option<Decimal>,
    high: Option<Decimal>,
    low: Option<Decimal>,
    close: Option<Decimal>,
    volume: i64,
    trade_count: i64,
    value_sum: Decimal,
}

impl CandleBuilder {
    fn new(symbol: String, interval: Interval, bucket_start: DateTime<Utc>) -> Self {
        Self {
            symbol,
            interval,
            bucket_start,
            open: None,
            high: None,
            low: None,
            close: None,
            volume: 0,
            trade_count: 0,
            value_sum: Decimal::ZERO,
        }
    }

    fn add_trade(&mut self, trade: &Trade) {
        let price = trade.price;

        if self.open.is_none() {
            self.open = Some(price);
        }
        self.high = Some(self.high.map_or(price, |h| h.max(price)));
        self.low = Some(self.low.map_or(price, |l| l.min(price)));
        self.close = Some(price);
        self.volume += trade.quantity;
        self.trade_count += 1;
        self.value_sum += price * Decimal::from(trade.quantity);
    }

    fn is_empty(&self) -> bool {
        self.trade_count == 0
    }

    fn to_candle(&self) -> Option<Candle> {
        let (open, close) = (self.open?, self.close?);
        let vwap = if self.volume > 0 {
            (self.value_sum / Decimal::from(self.volume)).round_dp(8)
        } else {
            close
        };

        Some(Candle {
            timestamp: self.bucket_start,
            symbol: self.symbol.clone(),
            interval: self.interval,
            open,
            high: self.high.unwrap_or(open),
            low: self.low.unwrap_or(open),
            close,
            volume: self.volume,
            trade_count: self.trade_count,
            vwap: Some(vwap),
        })
    }
}

/// Aggregates a trade stream into OHLCV candles across several intervals
/// at once (`builders: HashMap<(Interval, Symbol), CandleBuilder>`).
pub struct CandleAggregator {
    intervals: Vec<Interval>,
    builders: HashMap<(Interval, String), CandleBuilder>,
}

impl CandleAggregator {
    pub fn new(intervals: Vec<Interval>) -> Self {
        Self {
            intervals,
            builders: HashMap::new(),
        }
    }

    /// Add a trade to every configured interval's builder, flushing and
    /// replacing the builder whenever the trade lands in a new bucket.
    pub async fn add_trade(
        &mut self,
        trade: &Trade,
        repo: &TimeseriesRepository,
    ) -> Result<(), FinStreamError> {
        for &interval in &self.intervals {
            let bucket = bucket_start(trade.timestamp, interval);
            let key = (interval, trade.symbol.clone());

            let needs_flush = self
                .builders
                .get(&key)
                .map(|b| b.bucket_start != bucket)
                .unwrap_or(false);

            if needs_flush {
                if let Some(old) = self.builders.remove(&key) {
                    flush_builder(&old, repo).await;
                }
            }

            let builder = self
                .builders
                .entry(key)
                .or_insert_with(|| CandleBuilder::new(trade.symbol.clone(), interval, bucket));
            builder.add_trade(trade);
        }
        Ok(())
    }

    /// Flush any builder whose bucket has fully elapsed, replacing it with
    /// a fresh empty builder for the next period. Returns the number
    /// flushed.
    pub async fn flush_completed(&mut self, repo: &TimeseriesRepository) -> usize {
        let now = Utc::now();
        let mut flushed = 0;
        let mut replacements = Vec::new();

        for (key, builder) in self.builders.iter() {
            let bucket_end = builder.bucket_start + chrono::Duration::seconds(key.0.seconds());
            if now >= bucket_end {
                replacements.push(key.clone());
            }
        }

        for key in replacements {
            if let Some(old) = self.builders.remove(&key) {
                if flush_builder(&old, repo).await {
                    flushed += 1;
                }
                let new_bucket = bucket_start(now, key.0);
                self.builders.insert(
                    key.clone(),
                    CandleBuilder::new(key.1.clone(), key.0, new_bucket),
                );
            }
        }

        flushed
    }

    /// Flush every builder regardless of whether its bucket has elapsed —
    /// used on shutdown so in-progress candles are not lost.
    pub async fn flush_all(&mut self, repo: &TimeseriesRepository) -> usize {
        let mut flushed = 0;
        for (_, builder) in self.builders.drain() {
            if flush_builder(&builder, repo).await {
                flushed += 1;
            }
        }
        flushed
    }
}

async fn flush_builder(builder: &CandleBuilder, repo: &TimeseriesRepository) -> bool {
    if builder.is_empty() {
        return false;
    }
    let Some(candle) = builder.to_candle() else {
        return false;
    };

    match repo.upsert_candle(&candle).await {
        Ok(()) => {
            debug!(
                symbol = %candle.symbol,
                interval = candle.interval.as_str(),
                open = %candle.open,
                close = %candle.close,
                volume = candle.volume,
                "candle_produced"
            );
            true
        }
        Err(e) => {
            error!(symbol = %builder.symbol, interval = builder.interval.as_str(), error = %e, "candle_flush_error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trade_at(symbol: &str, ts: DateTime<Utc>, price: &str, qty: i64) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            timestamp: ts,
            trade_id: "t1".to_string(),
            price: price.parse().unwrap(),
            quantity: qty,
            side: crate::models::Side::Buy,
            exchange: "NASDAQ".to_string(),
            trace_id: None,
        }
    }

    #[test]
    fn bucket_start_floors_to_interval_boundary() {
        let ts = Utc.timestamp_opt(1_700_000_095, 0).unwrap();
        let bucket = bucket_start(ts, Interval::OneMinute);
        assert_eq!(bucket.timestamp() % 60, 0);
        assert!(bucket.timestamp() <= ts.timestamp());
    }

    #[test]
    fn candle_builder_computes_vwap() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut builder = CandleBuilder::new("AAPL".to_string(), Interval::OneMinute, ts);
        builder.add_trade(&trade_at("AAPL", ts, "100.00", 10));
        builder.add_trade(&trade_at("AAPL", ts, "102.00", 30));

        let candle = builder.to_candle().unwrap();
        assert_eq!(candle.open, "100.00".parse().unwrap());
        assert_eq!(candle.close, "102.00".parse().unwrap());
        assert_eq!(candle.volume, 40);
        // (100*10 + 102*30) / 40 = 101.5
        assert_eq!(candle.vwap.unwrap(), "101.50000000".parse().unwrap());
    }

    #[test]
    fn empty_builder_has_no_candle() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let builder = CandleBuilder::new("AAPL".to_string(), Interval::OneMinute, ts);
        assert!(builder.is_empty());
        assert!(builder.to_candle().is_none());
    }
}
