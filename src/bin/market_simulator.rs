//! Market Simulator binary: Synthetic Price Engine + Event Publisher.
//!
//! Orchestration shape ported from `market-simulator/app/main.py`'s
//! `SimulatorService`: a trade-producer loop (100ms batches), a
//! quote-producer loop (200ms, half the trade cadence), and a
//! stats-reporter loop (60s), all publishing onto the broker and exposed
//! behind `/health`, `/ready`, `/metrics`, `/status`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info};

use finstream::broker::Producer;
use finstream::config::Settings;
use finstream::models::{default_symbols, WireEvent};
use finstream::price_engine::PriceEngine;
use finstream::pubsub::{channel_for, Publisher};
use finstream::{http, telemetry};

const TRADES_PER_BATCH: usize = 50;
const BATCH_INTERVAL: Duration = Duration::from_millis(100);
const SIMULATION_SEED: u64 = 20_240_101;
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<PriceEngine>>,
    running: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    telemetry::init_tracing(&settings.service_name);
    let metrics_handle = telemetry::install_metrics_recorder("market-simulator");

    info!("starting_market_simulator");
    let producer = Arc::new(Producer::new(&settings)?);
    let publisher = Arc::new(Publisher::connect(&settings).await?);
    let engine = Arc::new(Mutex::new(PriceEngine::new(default_symbols(), SIMULATION_SEED)));
    let running = Arc::new(AtomicBool::new(true));

    let state = AppState {
        engine: engine.clone(),
        running: running.clone(),
    };

    let trade_task = tokio::spawn(trade_producer_loop(
        engine.clone(),
        producer.clone(),
        publisher.clone(),
        settings.clone(),
        running.clone(),
    ));
    let quote_task = tokio::spawn(quote_producer_loop(
        engine.clone(),
        producer.clone(),
        publisher.clone(),
        settings.clone(),
        running.clone(),
    ));
    let stats_task = tokio::spawn(stats_reporter_loop(engine.clone(), running.clone()));

    info!(symbols = default_symbols().len(), "market_simulator_started");

    let app = Router::new()
        .route("/ready", get(ready))
        .route("/stats", get(stats))
        .merge(http::ambient_routes(metrics_handle))
        .layer(axum::middleware::from_fn(http::request_logging))
        .with_state(state);

    let listener = TcpListener::bind(("0.0.0.0", settings.metrics_port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(http::shutdown_signal(running.clone()))
        .await?;

    info!("market_simulator_shutting_down");
    running.store(false, Ordering::SeqCst);

    for (name, task) in [
        ("trade_producer_loop", trade_task),
        ("quote_producer_loop", quote_task),
        ("stats_reporter_loop", stats_task),
    ] {
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task)
            .await
            .is_err()
        {
            tracing::warn!(loop_name = name, "shutdown_join_timed_out");
        }
    }

    if let Err(e) = producer.flush(Duration::from_secs(10)) {
        error!(error = %e, "producer_flush_failed");
    }

    info!("market_simulator_stopped");
    Ok(())
}

async fn trade_producer_loop(
    engine: Arc<Mutex<PriceEngine>>,
    producer: Arc<Producer>,
    publisher: Arc<Publisher>,
    settings: Settings,
    running: Arc<AtomicBool>,
) {
    info!("trade_producer_loop_started");
    while running.load(Ordering::Relaxed) {
        let (trades, _quotes) = {
            let mut engine = engine.lock();
            engine.generate_batch(TRADES_PER_BATCH)
        };

        for trade in &trades {
            let payload = match trade.to_json() {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "trade_serialize_failed");
                    continue;
                }
            };
            let headers = trade
                .trace_id
                .as_deref()
                .map(finstream::broker::trace_headers);
            if let Err(e) = producer
                .send(&settings.topic_trades, &payload, Some(&trade.symbol), headers)
                .await
            {
                error!(error = %e, "trade_producer_error");
                metrics::counter!(telemetry::KAFKA_SEND_ERRORS_TOTAL, "topic" => settings.topic_trades.clone())
                    .increment(1);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            metrics::counter!(telemetry::TRADES_PRODUCED_TOTAL, "symbol" => trade.symbol.clone(), "side" => trade.side.as_str())
                .increment(1);

            let channel = channel_for("trades", Some(&trade.symbol));
            if let Err(e) = publisher.publish(&channel, &payload).await {
                error!(error = %e, channel = %channel, "trade_redis_publish_failed");
            }
        }

        tokio::time::sleep(BATCH_INTERVAL).await;
    }
}

async fn quote_producer_loop(
    engine: Arc<Mutex<PriceEngine>>,
    producer: Arc<Producer>,
    publisher: Arc<Publisher>,
    settings: Settings,
    running: Arc<AtomicBool>,
) {
    info!("quote_producer_loop_started");
    while running.load(Ordering::Relaxed) {
        let quotes = {
            let engine = engine.lock();
            engine.quotes_snapshot()
        };

        for quote in &quotes {
            let payload = match quote.to_json() {
                Ok(p) => p,
                Err(e) => {
                    error!(error = %e, "quote_serialize_failed");
                    continue;
                }
            };
            if let Err(e) = producer
                .send(&settings.topic_quotes, &payload, Some(&quote.symbol), None)
                .await
            {
                error!(error = %e, "quote_producer_error");
                metrics::counter!(telemetry::KAFKA_SEND_ERRORS_TOTAL, "topic" => settings.topic_quotes.clone())
                    .increment(1);
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }

            let channel = channel_for("quotes", Some(&quote.symbol));
            if let Err(e) = publisher.publish(&channel, &payload).await {
                error!(error = %e, channel = %channel, "quote_redis_publish_failed");
            }
        }

        tokio::time::sleep(BATCH_INTERVAL * 2).await;
    }
}

async fn stats_reporter_loop(engine: Arc<Mutex<PriceEngine>>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_secs(60)).await;
        let engine = engine.lock();
        for cfg in default_symbols() {
            if let Some(state) = engine.state(cfg.symbol) {
                info!(
                    symbol = cfg.symbol,
                    price = state.price,
                    high = state.high,
                    low = state.low,
                    volume = state.volume,
                    trade_count = state.trade_count,
                    "symbol_stats"
                );
            }
        }
    }
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let is_ready = state.running.load(Ordering::Relaxed);
    Json(json!({ "status": if is_ready { "ready" } else { "not_ready" } }))
}

async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = state.engine.lock();
    let prices: serde_json::Map<String, serde_json::Value> = default_symbols()
        .into_iter()
        .filter_map(|cfg| {
            engine.state(cfg.symbol).map(|s| {
                (
                    cfg.symbol.to_string(),
                    json!({
                        "price": s.price,
                        "bid": s.bid_price,
                        "ask": s.ask_price,
                        "high": s.high,
                        "low": s.low,
                        "volume": s.volume,
                        "trades": s.trade_count,
                    }),
                )
            })
        })
        .collect();

    Json(json!({
        "running": state.running.load(Ordering::Relaxed),
        "prices": prices,
    }))
}
