//! Anomaly detector: rolling EMA statistics and z-score based alerts.
//!
//! Ported from `SymbolStats`/`AlertDetector` in the alert-service. Price
//! spikes are checked before volume anomalies on every trade (first match
//! wins, matching the Python `process_trade` precedence), and each
//! (symbol, alert_type) pair has an independent 60s cooldown.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rust_decimal::prelude::ToPrimitive;
use serde_json::json;
use tracing::warn;

use crate::models::{Alert, AlertType, Quote, Severity, Trade};

const PRICE_HISTORY_CAP: usize = 1000;
const VOLUME_HISTORY_CAP: usize = 1000;
const SPREAD_HISTORY_CAP: usize = 500;
const EMA_ALPHA: f64 = 0.01;
const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct SymbolStats {
    prices: VecDeque<f64>,
    price_ema: f64,
    price_ema_variance: f64,

    volumes: VecDeque<i64>,
    volume_ema: f64,

    spreads: VecDeque<f64>,
    spread_ema: f64,

    last_price: f64,
    last_volume: i64,
    trade_count: u64,
}

fn push_bounded<T>(ring: &mut VecDeque<T>, value: T, cap: usize) {
    if ring.len() == cap {
        ring.pop_front();
    }
    ring.push_back(value);
}

pub struct DetectorConfig {
    pub price_spike_threshold: f64,
    pub volume_anomaly_multiplier: f64,
    pub spread_anomaly_multiplier: f64,
    pub min_samples: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            price_spike_threshold: 3.0,
            volume_anomaly_multiplier: 5.0,
            spread_anomaly_multiplier: 3.0,
            min_samples: 100,
        }
    }
}

pub struct AlertDetector {
    config: DetectorConfig,
    stats: HashMap<String, SymbolStats>,
    last_alert: HashMap<(String, AlertType), Instant>,
}

impl AlertDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            stats: HashMap::new(),
            last_alert: HashMap::new(),
        }
    }

    fn can_alert(&self, symbol: &str, alert_type: AlertType) -> bool {
        match self.last_alert.get(&(symbol.to_string(), alert_type)) {
            Some(last) => last.elapsed() >= COOLDOWN,
            None => true,
        }
    }

    fn record_alert(&mut self, symbol: &str, alert_type: AlertType) {
        self.last_alert
            .insert((symbol.to_string(), alert_type), Instant::now());
    }

    pub fn process_trade(&mut self, trade: &Trade) -> Option<Alert> {
        let price = trade.price.to_f64().unwrap_or(0.0);
        let volume = trade.quantity;

        let stats = self.stats.entry(trade.symbol.clone()).or_default();
        push_bounded(&mut stats.prices, price, PRICE_HISTORY_CAP);
        push_bounded(&mut stats.volumes, volume, VOLUME_HISTORY_CAP);
        stats.trade_count += 1;

        if stats.price_ema == 0.0 {
            stats.price_ema = price;
            stats.volume_ema = volume as f64;
        } else {
            stats.price_ema = EMA_ALPHA * price + (1.0 - EMA_ALPHA) * stats.price_ema;
            stats.volume_ema = EMA_ALPHA * volume as f64 + (1.0 - EMA_ALPHA) * stats.volume_ema;

            let diff_sq = (price - stats.price_ema).powi(2);
            stats.price_ema_variance =
                EMA_ALPHA * diff_sq + (1.0 - EMA_ALPHA) * stats.price_ema_variance;
        }

        let mut alert = None;
        if stats.trade_count >= self.config.min_samples {
            alert = self.check_price_spike(trade, price);
            if alert.is_none() {
                alert = self.check_volume_anomaly(trade, volume);
            }
        }

        let stats = self.stats.get_mut(&trade.symbol).unwrap();
        stats.last_price = price;
        stats.last_volume = volume;

        alert
    }

    pub fn process_quote(&mut self, quote: &Quote) -> Option<Alert> {
        let spread = (quote.ask_price - quote.bid_price).to_f64().unwrap_or(0.0);

        let stats = self.stats.entry(quote.symbol.clone()).or_default();
        push_bounded(&mut stats.spreads, spread, SPREAD_HISTORY_CAP);

        if stats.spread_ema == 0.0 {
            stats.spread_ema = spread;
        } else {
            stats.spread_ema = EMA_ALPHA * spread + (1.0 - EMA_ALPHA) * stats.spread_ema;
        }

        let sample_count = self.stats.get(&quote.symbol).unwrap().spreads.len() as u64;
        if sample_count >= self.config.min_samples {
            self.check_spread_anomaly(quote, spread)
        } else {
            None
        }
    }

    fn check_price_spike(&mut self, trade: &Trade, price: f64) -> Option<Alert> {
        let stats = self.stats.get(&trade.symbol)?;
        if stats.price_ema_variance <= 0.0 {
            return None;
        }
        if !self.can_alert(&trade.symbol, AlertType::PriceSpike) {
            return None;
        }

        let std_dev = stats.price_ema_variance.sqrt();
        let ema = stats.price_ema;
        let z_score = if std_dev > 0.0 {
            (price - ema).abs() / std_dev
        } else {
            0.0
        };

        if z_score < self.config.price_spike_threshold {
            return None;
        }

        let severity = if z_score >= 5.0 {
            Severity::Critical
        } else if z_score >= 4.0 {
            Severity::High
        } else if z_score >= 3.5 {
            Severity::Medium
        } else {
            Severity::Low
        };

        let pct_change = ((price - ema) / ema) * 100.0;

        let alert = Alert::new(
            trade.symbol.clone(),
            AlertType::PriceSpike,
            severity,
            format!(
                "Price spike detected: {price:.2} (Z-score: {z_score:.2}, {pct_change:+.2}%)"
            ),
            json!({
                "price": price,
                "ema": (ema * 100.0).round() / 100.0,
                "z_score": (z_score * 100.0).round() / 100.0,
                "pct_change": (pct_change * 100.0).round() / 100.0,
                "trade_id": trade.trade_id,
            }),
        );

        self.record_alert(&trade.symbol, AlertType::PriceSpike);
        warn!(symbol = %trade.symbol, price, z_score, severity = ?severity, "price_spike_detected");

        Some(alert)
    }

    fn check_volume_anomaly(&mut self, trade: &Trade, volume: i64) -> Option<Alert> {
        let stats = self.stats.get(&trade.symbol)?;
        if stats.volume_ema <= 0.0 {
            return None;
        }
        if !self.can_alert(&trade.symbol, AlertType::VolumeAnomaly) {
            return None;
        }

        let volume_ratio = volume as f64 / stats.volume_ema;
        if volume_ratio < self.config.volume_anomaly_multiplier {
            return None;
        }

        let severity = if volume_ratio >= 20.0 {
            Severity::Critical
        } else if volume_ratio >= 10.0 {
            Severity::High
        } else if volume_ratio >= 7.0 {
            Severity::Medium
        } else {
            Severity::Low
        };

        let volume_ema = stats.volume_ema;
        let alert = Alert::new(
            trade.symbol.clone(),
            AlertType::VolumeAnomaly,
            severity,
            format!("Volume anomaly: {volume} shares ({volume_ratio:.1}x normal)"),
            json!({
                "volume": volume,
                "volume_ema": volume_ema.round(),
                "volume_ratio": (volume_ratio * 100.0).round() / 100.0,
                "trade_id": trade.trade_id,
            }),
        );

        self.record_alert(&trade.symbol, AlertType::VolumeAnomaly);
        warn!(symbol = %trade.symbol, volume, ratio = volume_ratio, severity = ?severity, "volume_anomaly_detected");

        Some(alert)
    }

    fn check_spread_anomaly(&mut self, quote: &Quote, spread: f64) -> Option<Alert> {
        let stats = self.stats.get(&quote.symbol)?;
        if stats.spread_ema <= 0.0 {
            return None;
        }
        if !self.can_alert(&quote.symbol, AlertType::SpreadAnomaly) {
            return None;
        }

        let spread_ratio = spread / stats.spread_ema;
        if spread_ratio < self.config.spread_anomaly_multiplier {
            return None;
        }

        let severity = if spread_ratio >= 10.0 {
            Severity::Critical
        } else if spread_ratio >= 5.0 {
            Severity::High
        } else if spread_ratio >= 4.0 {
            Severity::Medium
        } else {
            Severity::Low
        };

        let spread_ema = stats.spread_ema;
        let alert = Alert::new(
            quote.symbol.clone(),
            AlertType::SpreadAnomaly,
            severity,
            format!("Spread anomaly: ${spread:.4} ({spread_ratio:.1}x normal)"),
            json!({
                "spread": spread,
                "spread_ema": (spread_ema * 10000.0).round() / 10000.0,
                "spread_ratio": (spread_ratio * 100.0).round() / 100.0,
                "bid": quote.bid_price.to_f64().unwrap_or(0.0),
                "ask": quote.ask_price.to_f64().unwrap_or(0.0),
            }),
        );

        self.record_alert(&quote.symbol, AlertType::SpreadAnomaly);
        warn!(symbol = %quote.symbol, spread, ratio = spread_ratio, severity = ?severity, "spread_anomaly_detected");

        Some(alert)
    }

    /// Snapshot for the `/stats/{symbol}` endpoint.
    pub fn symbol_snapshot(&self, symbol: &str) -> Option<SymbolSnapshot> {
        let stats = self.stats.get(symbol)?;
        Some(SymbolSnapshot {
            symbol: symbol.to_string(),
            price_ema: stats.price_ema,
            price_std: if stats.price_ema_variance > 0.0 {
                stats.price_ema_variance.sqrt()
            } else {
                0.0
            },
            volume_ema: stats.volume_ema,
            spread_ema: stats.spread_ema,
            trade_count: stats.trade_count,
            last_price: stats.last_price,
        })
    }

    pub fn all_symbols(&self) -> Vec<String> {
        self.stats.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub price_ema: f64,
    pub price_std: f64,
    pub volume_ema: f64,
    pub spread_ema: f64,
    pub trade_count: u64,
    pub last_price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::Utc;

    fn trade(symbol: &str, price: &str, qty: i64) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            trade_id: "t1".to_string(),
            price: price.parse().unwrap(),
            quantity: qty,
            side: Side::Buy,
            exchange: "NASDAQ".to_string(),
            trace_id: None,
        }
    }

    #[test]
    fn no_alert_before_min_samples() {
        let mut detector = AlertDetector::new(DetectorConfig::default());
        for _ in 0..50 {
            assert!(detector.process_trade(&trade("AAPL", "185.00", 100)).is_none());
        }
    }

    #[test]
    fn price_spike_triggers_after_warmup() {
        let mut detector = AlertDetector::new(DetectorConfig::default());
        for _ in 0..150 {
            detector.process_trade(&trade("AAPL", "185.00", 100));
        }
        let alert = detector.process_trade(&trade("AAPL", "400.00", 100));
        assert!(alert.is_some());
        assert_eq!(alert.unwrap().alert_type, AlertType::PriceSpike);
    }

    #[test]
    fn cooldown_suppresses_repeat_alerts() {
        let mut detector = AlertDetector::new(DetectorConfig::default());
        for _ in 0..150 {
            detector.process_trade(&trade("AAPL", "185.00", 100));
        }
        let first = detector.process_trade(&trade("AAPL", "400.00", 100));
        assert!(first.is_some());
        let second = detector.process_trade(&trade("AAPL", "400.00", 100));
        assert!(second.is_none());
    }
}
