//! Stream Processor binary: OHLCV Candle Aggregator.
//!
//! Ported from `stream-processor/app/main.py`'s `StreamProcessorService`:
//! a trade-consumer loop batching inserts every 100 trades, and a
//! candle-flush loop every 5 seconds. On shutdown, `flush_all` persists
//! any in-progress candle rather than dropping it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use finstream::aggregator::CandleAggregator;
use finstream::broker::EventConsumer;
use finstream::config::Settings;
use finstream::models::{Interval, Trade, WireEvent};
use finstream::timeseries::TimeseriesRepository;
use finstream::{http, telemetry};

const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const INSERT_BATCH_SIZE: usize = 100;
const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct Stats {
    trades_processed: Arc<AtomicU64>,
    candles_produced: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    telemetry::init_tracing(&settings.service_name);
    let metrics_handle = telemetry::install_metrics_recorder("stream-processor");

    info!("starting_stream_processor");
    let repo = Arc::new(TimeseriesRepository::connect(&settings).await?);
    let aggregator = Arc::new(Mutex::new(CandleAggregator::new(vec![
        Interval::OneMinute,
        Interval::FiveMinutes,
    ])));
    let consumer_settings = Settings {
        kafka_consumer_group_id: "stream-processor-group".to_string(),
        ..settings.clone()
    };
    let consumer = Arc::new(EventConsumer::new(
        &consumer_settings,
        &[&settings.topic_trades],
    )?);
    let running = Arc::new(AtomicBool::new(true));

    let stats = Stats {
        trades_processed: Arc::new(AtomicU64::new(0)),
        candles_produced: Arc::new(AtomicU64::new(0)),
        running: running.clone(),
    };

    let consumer_task = tokio::spawn(trade_consumer_loop(
        consumer.clone(),
        aggregator.clone(),
        repo.clone(),
        stats.clone(),
        running.clone(),
    ));
    let flush_task = tokio::spawn(candle_flush_loop(
        aggregator.clone(),
        repo.clone(),
        stats.clone(),
        running.clone(),
    ));

    info!("stream_processor_started");

    let app = Router::new()
        .route("/ready", get(ready))
        .route("/stats", get(stats_handler))
        .merge(http::ambient_routes(metrics_handle))
        .layer(axum::middleware::from_fn(http::request_logging))
        .with_state(stats);

    let listener = TcpListener::bind(("0.0.0.0", settings.metrics_port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(http::shutdown_signal(running.clone()))
        .await?;

    info!("stream_processor_shutting_down");
    running.store(false, Ordering::SeqCst);

    for (name, task) in [("trade_consumer_loop", consumer_task), ("candle_flush_loop", flush_task)] {
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task)
            .await
            .is_err()
        {
            warn!(loop_name = name, "shutdown_join_timed_out");
        }
    }

    aggregator.lock().await.flush_all(&repo).await;
    if let Err(e) = consumer.commit() {
        error!(error = %e, "final_offset_commit_failed");
    }

    info!("stream_processor_stopped");
    Ok(())
}

async fn trade_consumer_loop(
    consumer: Arc<EventConsumer>,
    aggregator: Arc<Mutex<CandleAggregator>>,
    repo: Arc<TimeseriesRepository>,
    stats: Stats,
    running: Arc<AtomicBool>,
) {
    info!("trade_consumer_loop_started");
    let mut batch: Vec<Trade> = Vec::with_capacity(INSERT_BATCH_SIZE);

    while running.load(Ordering::Relaxed) {
        let message = match tokio::time::timeout(RECV_POLL_TIMEOUT, consumer.recv()).await {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                error!(error = %e, "consumer_loop_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            Err(_) => continue, // poll timed out, re-check `running`
        };

        let trade = match Trade::from_json(&message.payload) {
            Ok(t) => t,
            Err(e) => {
                error!(
                    error = %e,
                    partition = message.partition,
                    offset = message.offset,
                    "trade_processing_error"
                );
                continue;
            }
        };

        if let Err(e) = aggregator.lock().await.add_trade(&trade, &repo).await {
            error!(error = %e, "aggregator_add_trade_failed");
        }

        batch.push(trade);
        stats.trades_processed.fetch_add(1, Ordering::Relaxed);

        if batch.len() >= INSERT_BATCH_SIZE {
            if let Err(e) = repo.insert_trades(&batch).await {
                error!(error = %e, "trade_insert_error");
            }
            batch.clear();
            if let Err(e) = consumer.commit() {
                error!(error = %e, "offset_commit_failed");
            }
        }
    }
    info!("trade_consumer_loop_stopped");
}

async fn candle_flush_loop(
    aggregator: Arc<Mutex<CandleAggregator>>,
    repo: Arc<TimeseriesRepository>,
    stats: Stats,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(FLUSH_INTERVAL).await;
        let flushed = aggregator.lock().await.flush_completed(&repo).await;
        if flushed > 0 {
            stats
                .candles_produced
                .fetch_add(flushed as u64, Ordering::Relaxed);
            info!(count = flushed, "candles_flushed");
        }
    }
    info!("candle_flush_loop_stopped");
}

async fn ready(State(stats): State<Stats>) -> Json<serde_json::Value> {
    let is_ready = stats.running.load(Ordering::Relaxed);
    Json(json!({ "status": if is_ready { "ready" } else { "not_ready" } }))
}

async fn stats_handler(State(stats): State<Stats>) -> Json<serde_json::Value> {
    Json(json!({
        "trades_processed": stats.trades_processed.load(Ordering::Relaxed),
        "candles_produced": stats.candles_produced.load(Ordering::Relaxed),
    }))
}
