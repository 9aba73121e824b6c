//! Alert Service binary: anomaly detector over trades and quotes.
//!
//! Ported from `alert-service/app/main.py`'s `AlertService`: two consumers
//! (`alert-service-trades`, `alert-service-quotes`) feed a shared
//! `AlertDetector`; every alert is published both to the Kafka alerts
//! topic and onto the Redis channels the gateway relays to clients.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use finstream::broker::{EventConsumer, Producer};
use finstream::config::Settings;
use finstream::detector::{AlertDetector, DetectorConfig};
use finstream::models::{Alert, Quote, Trade, WireEvent};
use finstream::pubsub::{channel_for, Publisher};
use finstream::{http, telemetry};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct AppState {
    detector: Arc<Mutex<AlertDetector>>,
    alerts_triggered: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    telemetry::init_tracing(&settings.service_name);
    let metrics_handle = telemetry::install_metrics_recorder("alert-service");

    info!("starting_alert_service");
    let publisher = Arc::new(Publisher::connect(&settings).await?);
    let producer = Arc::new(Producer::new(&settings)?);
    let detector = Arc::new(Mutex::new(AlertDetector::new(DetectorConfig::default())));

    let trade_consumer_settings = Settings {
        kafka_consumer_group_id: "alert-service-trades".to_string(),
        ..settings.clone()
    };
    let trade_consumer = Arc::new(EventConsumer::new(
        &trade_consumer_settings,
        &[&settings.topic_trades],
    )?);

    let quote_consumer_settings = Settings {
        kafka_consumer_group_id: "alert-service-quotes".to_string(),
        ..settings.clone()
    };
    let quote_consumer = Arc::new(EventConsumer::new(
        &quote_consumer_settings,
        &[&settings.topic_quotes],
    )?);

    let alerts_triggered = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(true));
    let state = AppState {
        detector: detector.clone(),
        alerts_triggered: alerts_triggered.clone(),
        running: running.clone(),
    };

    let trade_task = tokio::spawn(trade_monitor_loop(
        trade_consumer.clone(),
        detector.clone(),
        producer.clone(),
        publisher.clone(),
        settings.clone(),
        alerts_triggered.clone(),
        running.clone(),
    ));
    let quote_task = tokio::spawn(quote_monitor_loop(
        quote_consumer.clone(),
        detector.clone(),
        producer.clone(),
        publisher.clone(),
        settings.clone(),
        alerts_triggered.clone(),
        running.clone(),
    ));

    info!("alert_service_started");

    let app = Router::new()
        .route("/ready", get(ready))
        .route("/stats", get(stats_handler))
        .route("/stats/:symbol", get(symbol_stats_handler))
        .merge(http::ambient_routes(metrics_handle))
        .layer(axum::middleware::from_fn(http::request_logging))
        .with_state(state);

    let listener = TcpListener::bind(("0.0.0.0", settings.metrics_port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(http::shutdown_signal(running.clone()))
        .await?;

    info!("alert_service_shutting_down");
    running.store(false, Ordering::SeqCst);

    for (name, task) in [("trade_monitor_loop", trade_task), ("quote_monitor_loop", quote_task)] {
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, task)
            .await
            .is_err()
        {
            warn!(loop_name = name, "shutdown_join_timed_out");
        }
    }

    if let Err(e) = producer.flush(Duration::from_secs(10)) {
        error!(error = %e, "producer_flush_failed");
    }
    if let Err(e) = trade_consumer.commit() {
        error!(error = %e, "final_offset_commit_failed");
    }
    if let Err(e) = quote_consumer.commit() {
        error!(error = %e, "final_offset_commit_failed");
    }

    info!("alert_service_stopped");
    Ok(())
}

async fn trade_monitor_loop(
    consumer: Arc<EventConsumer>,
    detector: Arc<Mutex<AlertDetector>>,
    producer: Arc<Producer>,
    publisher: Arc<Publisher>,
    settings: Settings,
    alerts_triggered: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    info!("trade_monitor_loop_started");
    while running.load(Ordering::Relaxed) {
        let message = match tokio::time::timeout(RECV_POLL_TIMEOUT, consumer.recv()).await {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                error!(error = %e, "trade_monitor_consumer_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            Err(_) => continue,
        };

        let trade = match Trade::from_json(&message.payload) {
            Ok(t) => t,
            Err(e) => {
                error!(
                    error = %e,
                    partition = message.partition,
                    offset = message.offset,
                    "trade_monitor_decode_error"
                );
                continue;
            }
        };

        let alert = detector.lock().await.process_trade(&trade);
        if let Some(alert) = alert {
            publish_alert(&alert, &producer, &publisher, &settings, &alerts_triggered).await;
        }
    }
    info!("trade_monitor_loop_stopped");
}

async fn quote_monitor_loop(
    consumer: Arc<EventConsumer>,
    detector: Arc<Mutex<AlertDetector>>,
    producer: Arc<Producer>,
    publisher: Arc<Publisher>,
    settings: Settings,
    alerts_triggered: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
) {
    info!("quote_monitor_loop_started");
    while running.load(Ordering::Relaxed) {
        let message = match tokio::time::timeout(RECV_POLL_TIMEOUT, consumer.recv()).await {
            Ok(Ok(m)) => m,
            Ok(Err(e)) => {
                error!(error = %e, "quote_monitor_consumer_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
            Err(_) => continue,
        };

        let quote = match Quote::from_json(&message.payload) {
            Ok(q) => q,
            Err(e) => {
                error!(
                    error = %e,
                    partition = message.partition,
                    offset = message.offset,
                    "quote_monitor_decode_error"
                );
                continue;
            }
        };

        let alert = detector.lock().await.process_quote(&quote);
        if let Some(alert) = alert {
            publish_alert(&alert, &producer, &publisher, &settings, &alerts_triggered).await;
        }
    }
    info!("quote_monitor_loop_stopped");
}

/// Publishes an alert to both the Kafka alerts topic (for durable
/// consumers) and the Redis channels the gateway relays over WebSocket,
/// matching `_publish_alert`'s dual-write.
async fn publish_alert(
    alert: &Alert,
    producer: &Producer,
    publisher: &Publisher,
    settings: &Settings,
    alerts_triggered: &AtomicU64,
) {
    let payload = match alert.to_json() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "alert_serialize_failed");
            return;
        }
    };

    if let Err(e) = producer
        .send(&settings.topic_alerts, &payload, Some(&alert.symbol), None)
        .await
    {
        error!(error = %e, "alert_kafka_publish_failed");
        metrics::counter!(telemetry::KAFKA_SEND_ERRORS_TOTAL, "topic" => settings.topic_alerts.clone())
            .increment(1);
    }

    let symbol_channel = channel_for("alerts", Some(&alert.symbol));
    if let Err(e) = publisher.publish(&symbol_channel, &payload).await {
        error!(error = %e, channel = %symbol_channel, "alert_redis_publish_failed");
    }

    let broadcast_channel = channel_for("alerts", None);
    if let Err(e) = publisher.publish(&broadcast_channel, &payload).await {
        error!(error = %e, channel = %broadcast_channel, "alert_redis_publish_failed");
    }

    alerts_triggered.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(telemetry::ALERTS_TRIGGERED_TOTAL, "symbol" => alert.symbol.clone(), "alert_type" => alert.alert_type.as_str())
        .increment(1);
    info!(symbol = %alert.symbol, alert_type = alert.alert_type.as_str(), severity = ?alert.severity, "alert_published");
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let is_ready = state.running.load(Ordering::Relaxed);
    Json(json!({ "status": if is_ready { "ready" } else { "not_ready" } }))
}

async fn stats_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let detector = state.detector.lock().await;
    Json(json!({
        "alerts_triggered": state.alerts_triggered.load(Ordering::Relaxed),
        "symbols_tracked": detector.all_symbols().len(),
    }))
}

async fn symbol_stats_handler(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Json<serde_json::Value> {
    let detector = state.detector.lock().await;
    match detector.symbol_snapshot(&symbol) {
        Some(snapshot) => Json(json!(snapshot)),
        None => Json(json!({ "error": "symbol not tracked", "symbol": symbol })),
    }
}
