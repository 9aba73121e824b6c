//! TimescaleDB/Postgres repository for trades, quotes and candles.
//!
//! Rust analogue of `stream-processor/app/repository.py`'s
//! `TradeRepository`, built on `sqlx::PgPool` instead of `asyncpg`. Keeps
//! the same upsert semantics: trades are insert-or-ignore on the
//! `(symbol, timestamp, trade_id)` key (idempotent at-least-once
//! delivery), candles are insert-or-update on `(timestamp, symbol,
//! interval)`.

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, instrument};

use crate::config::Settings;
use crate::error::FinStreamError;
use crate::models::{Candle, Interval, Quote, Trade};

#[derive(Clone)]
pub struct TimeseriesRepository {
    pool: PgPool,
}

impl TimeseriesRepository {
    pub async fn connect(settings: &Settings) -> Result<Self, FinStreamError> {
        info!(pool_size = settings.timescale_pool_size, "connecting_to_database");

        let pool = PgPoolOptions::new()
            .max_connections(settings.timescale_pool_size)
            .acquire_timeout(settings.timescale_pool_timeout)
            .connect(&settings.timescale_url)
            .await?;

        info!("database_connected");
        Ok(Self { pool })
    }

    #[instrument(skip(self, trades))]
    pub async fn insert_trades(&self, trades: &[Trade]) -> Result<usize, FinStreamError> {
        if trades.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for trade in trades {
            sqlx::query(
                "INSERT INTO trades (symbol, timestamp, trade_id, price, quantity, side, exchange)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (symbol, timestamp, trade_id) DO NOTHING",
            )
            .bind(&trade.symbol)
            .bind(trade.timestamp)
            .bind(&trade.trade_id)
            .bind(trade.price)
            .bind(trade.quantity)
            .bind(trade.side.as_str())
            .bind(&trade.exchange)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        metrics::counter!(crate::telemetry::DB_QUERIES_TOTAL, "operation" => "insert", "table" => "trades")
            .increment(trades.len() as u64);

        Ok(trades.len())
    }

    #[instrument(skip(self, quote))]
    pub async fn insert_quote(&self, quote: &Quote) -> Result<(), FinStreamError> {
        sqlx::query(
            "INSERT INTO quotes (timestamp, symbol, bid_price, bid_size, ask_price, ask_size, exchange)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(quote.timestamp)
        .bind(&quote.symbol)
        .bind(quote.bid_price)
        .bind(quote.bid_size)
        .bind(quote.ask_price)
        .bind(quote.ask_size)
        .bind(&quote.exchange)
        .execute(&self.pool)
        .await?;

        metrics::counter!(crate::telemetry::DB_QUERIES_TOTAL, "operation" => "insert", "table" => "quotes")
            .increment(1);
        Ok(())
    }

    #[instrument(skip(self, candle))]
    pub async fn upsert_candle(&self, candle: &Candle) -> Result<(), FinStreamError> {
        sqlx::query(
            "INSERT INTO candles (timestamp, symbol, interval, open, high, low, close, volume, trade_count, vwap)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (timestamp, symbol, interval) DO UPDATE SET
                 open = EXCLUDED.open,
                 high = EXCLUDED.high,
                 low = EXCLUDED.low,
                 close = EXCLUDED.close,
                 volume = EXCLUDED.volume,
                 trade_count = EXCLUDED.trade_count,
                 vwap = EXCLUDED.vwap",
        )
        .bind(candle.timestamp)
        .bind(&candle.symbol)
        .bind(candle.interval.as_str())
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.trade_count)
        .bind(candle.vwap)
        .execute(&self.pool)
        .await?;

        metrics::counter!(crate::telemetry::DB_QUERIES_TOTAL, "operation" => "upsert", "table" => "candles")
            .increment(1);
        Ok(())
    }

    pub async fn get_latest_trades(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<Trade>, FinStreamError> {
        let rows = sqlx::query_as::<_, TradeRow>(
            "SELECT timestamp, trade_id, symbol, price, quantity, side, exchange
             FROM trades WHERE symbol = $1 ORDER BY timestamp DESC LIMIT $2",
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        metrics::counter!(crate::telemetry::DB_QUERIES_TOTAL, "operation" => "select", "table" => "trades")
            .increment(1);

        Ok(rows.into_iter().map(Trade::from).collect())
    }

    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: i64,
    ) -> Result<Vec<Candle>, FinStreamError> {
        let rows = sqlx::query_as::<_, CandleRow>(
            "SELECT timestamp, symbol, interval, open, high, low, close, volume, trade_count, vwap
             FROM candles WHERE symbol = $1 AND interval = $2
             ORDER BY timestamp DESC LIMIT $3",
        )
        .bind(symbol)
        .bind(interval.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        metrics::counter!(crate::telemetry::DB_QUERIES_TOTAL, "operation" => "select", "table" => "candles")
            .increment(1);

        Ok(rows.into_iter().map(Candle::from).collect())
    }

    /// Latest row from the `candles_1m` continuous aggregate, used by the
    /// gateway's `/stats/{symbol}` endpoint.
    pub async fn get_market_stats(&self, symbol: &str) -> Result<Option<MarketStats>, FinStreamError> {
        let row = sqlx::query_as::<_, MarketStats>(
            "SELECT symbol, close as current_price, high as high_price, low as low_price,
                    vwap, volume as total_volume, trade_count, timestamp
             FROM candles_1m WHERE symbol = $1 ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Closes every connection in the pool, waiting for in-flight queries
    /// to finish first. Called on shutdown so the gateway doesn't leave
    /// Postgres backends dangling when the process exits.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(sqlx::FromRow)]
struct TradeRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    trade_id: String,
    symbol: String,
    price: Decimal,
    quantity: i64,
    side: String,
    exchange: String,
}

impl From<TradeRow> for Trade {
    fn from(row: TradeRow) -> Self {
        Trade {
            symbol: row.symbol,
            timestamp: row.timestamp,
            trade_id: row.trade_id,
            price: row.price,
            quantity: row.quantity,
            side: if row.side == "buy" {
                crate::models::Side::Buy
            } else {
                crate::models::Side::Sell
            },
            exchange: row.exchange,
            trace_id: None,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CandleRow {
    timestamp: chrono::DateTime<chrono::Utc>,
    symbol: String,
    interval: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: i64,
    trade_count: i64,
    vwap: Option<Decimal>,
}

impl From<CandleRow> for Candle {
    fn from(row: CandleRow) -> Self {
        let interval = Interval::from_str_opt(&row.interval).unwrap_or(Interval::OneMinute);
        Candle {
            timestamp: row.timestamp,
            symbol: row.symbol,
            interval,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            trade_count: row.trade_count,
            vwap: row.vwap,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct MarketStats {
    pub symbol: String,
    pub current_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub vwap: Option<Decimal>,
    pub total_volume: i64,
    pub trade_count: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
