//! Wire and storage types shared by every binary.
//!
//! Field names mirror `finstream_common.models` (the Pydantic `BaseEvent`
//! subclasses this pipeline was distilled from) so that payloads produced
//! here are byte-for-byte compatible with any downstream consumer that
//! still expects the original JSON shape.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FinStreamError;

/// `DateTime<Utc>` (de)serialization matching the Python original's
/// `datetime.isoformat()`: microsecond resolution, no trailing `Z`/offset.
/// `chrono`'s blanket `serde` impl instead emits RFC-3339 with a trailing
/// `Z` and a variable number of fractional digits, which downstream
/// consumers built against the original wire format can't parse.
mod iso_micros {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(trimmed, FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    #[serde(with = "iso_micros")]
    pub timestamp: DateTime<Utc>,
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: i64,
    pub side: Side,
    pub exchange: String,
    /// Correlation id carried in the Kafka message headers (§6), not just
    /// the JSON body, so a trace survives even for consumers that only
    /// read headers. `None` for trades replayed from storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(with = "iso_micros")]
    pub timestamp: DateTime<Utc>,
    pub bid_price: Decimal,
    pub bid_size: i64,
    pub ask_price: Decimal,
    pub ask_size: i64,
    pub exchange: String,
}

/// Candle aggregation interval. `seconds()` matches the aggregator's
/// `INTERVAL_SECONDS` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl Interval {
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::OneMinute => 60,
            Interval::FiveMinutes => 300,
            Interval::FifteenMinutes => 900,
            Interval::OneHour => 3600,
            Interval::FourHours => 4 * 3600,
            Interval::OneDay => 24 * 3600,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::OneHour => "1h",
            Interval::FourHours => "4h",
            Interval::OneDay => "1d",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Interval> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "15m" => Some(Interval::FifteenMinutes),
            "1h" => Some(Interval::OneHour),
            "4h" => Some(Interval::FourHours),
            "1d" => Some(Interval::OneDay),
            _ => None,
        }
    }

    pub fn all() -> [Interval; 6] {
        [
            Interval::OneMinute,
            Interval::FiveMinutes,
            Interval::FifteenMinutes,
            Interval::OneHour,
            Interval::FourHours,
            Interval::OneDay,
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    #[serde(with = "iso_micros")]
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub interval: Interval,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub trade_count: i64,
    pub vwap: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PriceSpike,
    VolumeAnomaly,
    SpreadAnomaly,
    /// Not emitted by the built-in detector checks; kept for alerts raised
    /// by operators or future detection rules outside §4.4's three checks.
    Custom,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::PriceSpike => "price_spike",
            AlertType::VolumeAnomaly => "volume_anomaly",
            AlertType::SpreadAnomaly => "spread_anomaly",
            AlertType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_id: String,
    pub symbol: String,
    #[serde(with = "iso_micros")]
    pub timestamp: DateTime<Utc>,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    pub details: serde_json::Value,
}

impl Alert {
    pub fn new(
        symbol: impl Into<String>,
        alert_type: AlertType,
        severity: Severity,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            timestamp: Utc::now(),
            alert_type,
            severity,
            message: message.into(),
            details,
        }
    }
}

/// Per-symbol simulation parameters, mirroring `SymbolConfig` /
/// `DEFAULT_SYMBOLS` in the Python price generator.
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    pub symbol: &'static str,
    pub initial_price: f64,
    pub volatility: f64,
    pub exchange: &'static str,
    pub tick_size: f64,
    pub volume_weight: f64,
}

pub fn default_symbols() -> Vec<SymbolConfig> {
    vec![
        SymbolConfig { symbol: "AAPL", initial_price: 185.00, volatility: 0.25, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 2.0 },
        SymbolConfig { symbol: "GOOGL", initial_price: 140.00, volatility: 0.28, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 1.1 },
        SymbolConfig { symbol: "MSFT", initial_price: 380.00, volatility: 0.22, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 1.3 },
        SymbolConfig { symbol: "AMZN", initial_price: 170.00, volatility: 0.30, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 1.2 },
        SymbolConfig { symbol: "META", initial_price: 480.00, volatility: 0.35, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 1.0 },
        SymbolConfig { symbol: "NVDA", initial_price: 720.00, volatility: 0.45, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 1.8 },
        SymbolConfig { symbol: "TSLA", initial_price: 200.00, volatility: 0.50, exchange: "NASDAQ", tick_size: 0.01, volume_weight: 1.5 },
        SymbolConfig { symbol: "JPM", initial_price: 185.00, volatility: 0.18, exchange: "NYSE", tick_size: 0.01, volume_weight: 0.8 },
        SymbolConfig { symbol: "V", initial_price: 275.00, volatility: 0.20, exchange: "NYSE", tick_size: 0.01, volume_weight: 0.7 },
        SymbolConfig { symbol: "JNJ", initial_price: 160.00, volatility: 0.15, exchange: "NYSE", tick_size: 0.01, volume_weight: 0.5 },
    ]
}

/// Common serialization surface for every event type, analogous to the
/// Python `BaseEvent.to_json`/`from_json` pair.
pub trait WireEvent: Serialize + for<'de> Deserialize<'de> {
    fn to_json(&self) -> Result<Vec<u8>, FinStreamError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_json(data: &[u8]) -> Result<Self, FinStreamError>
    where
        Self: Sized,
    {
        Ok(serde_json::from_slice(data)?)
    }
}

impl WireEvent for Trade {}
impl WireEvent for Quote {}
impl WireEvent for Candle {}
impl WireEvent for Alert {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_roundtrips_through_json() {
        let trade = Trade {
            symbol: "AAPL".into(),
            timestamp: Utc::now(),
            trade_id: Uuid::new_v4().to_string(),
            price: Decimal::new(18504, 2),
            quantity: 100,
            side: Side::Buy,
            exchange: "NASDAQ".into(),
            trace_id: Some(Uuid::new_v4().to_string()),
        };
        let bytes = trade.to_json().unwrap();
        let back = Trade::from_json(&bytes).unwrap();
        assert_eq!(back.symbol, trade.symbol);
        assert_eq!(back.price, trade.price);
        assert_eq!(back.trace_id, trade.trace_id);
    }

    #[test]
    fn timestamp_wire_format_has_no_trailing_z() {
        let trade = Trade {
            symbol: "AAPL".into(),
            timestamp: Utc::now(),
            trade_id: Uuid::new_v4().to_string(),
            price: Decimal::new(18504, 2),
            quantity: 100,
            side: Side::Buy,
            exchange: "NASDAQ".into(),
            trace_id: None,
        };
        let json = String::from_utf8(trade.to_json().unwrap()).unwrap();
        assert!(!json.contains('Z'), "wire timestamp must not carry a trailing Z: {json}");
    }

    #[test]
    fn interval_seconds_match_table() {
        assert_eq!(Interval::OneMinute.seconds(), 60);
        assert_eq!(Interval::OneHour.seconds(), 3600);
    }

    #[test]
    fn default_symbols_has_ten_entries() {
        let symbols = default_symbols();
        assert_eq!(symbols.len(), 10);
        assert!(symbols.iter().any(|s| s.symbol == "NVDA" && s.volatility == 0.45));
    }
}
