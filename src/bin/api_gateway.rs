//! API Gateway binary: REST history queries + Live Broadcast Hub.
//!
//! Ported from `api-gateway/app/main.py`'s `APIGateway`/`ConnectionManager`
//! pair: a background task bridges the Redis pub/sub fabric into
//! [`finstream::hub::Hub`], and WebSocket clients subscribe per channel
//! (`trades:<SYM>`, `quotes:<SYM>`, `alerts:<SYM>`, `alerts:all`). REST
//! handlers read history straight from the time-series store, in the
//! style of the teacher's `api/signals_api.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use finstream::config::Settings;
use finstream::hub::{handle_socket, Hub};
use finstream::models::{Candle, Interval, Trade};
use finstream::pubsub::run_subscriber;
use finstream::timeseries::TimeseriesRepository;
use finstream::{http, telemetry};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    repo: Arc<TimeseriesRepository>,
    hub: Hub,
    running: Arc<AtomicBool>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize)]
struct CandleQuery {
    #[serde(default = "default_interval")]
    interval: String,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_interval() -> String {
    "1m".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    telemetry::init_tracing(&settings.service_name);
    let metrics_handle = telemetry::install_metrics_recorder("api-gateway");

    info!("starting_api_gateway");
    let repo = Arc::new(TimeseriesRepository::connect(&settings).await?);
    let hub = Hub::new();
    let running = Arc::new(AtomicBool::new(true));

    let bridge_task = tokio::spawn(redis_bridge_loop(settings.clone(), hub.clone()));

    let state = AppState {
        repo: repo.clone(),
        hub: hub.clone(),
        running: running.clone(),
    };

    info!("api_gateway_started");

    let app = Router::new()
        .route("/ready", get(ready))
        .route("/stats", get(component_stats))
        .route("/trades/:symbol", get(get_trades))
        .route("/candles/:symbol", get(get_candles))
        .route("/stats/:symbol", get(get_market_stats))
        .route("/ws/:channel", get(ws_handler))
        .merge(http::ambient_routes(metrics_handle))
        .layer(axum::middleware::from_fn(http::request_logging))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(("0.0.0.0", settings.metrics_port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(http::shutdown_signal(running.clone()))
        .await?;

    info!("api_gateway_shutting_down");
    running.store(false, Ordering::SeqCst);

    // `redis_bridge_loop` blocks on the pub/sub stream with no `running`
    // check reachable mid-read, so it is aborted rather than joined.
    bridge_task.abort();
    let _ = tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, bridge_task).await;

    repo.close().await;

    info!("api_gateway_stopped");
    Ok(())
}

/// Bridges Redis pub/sub messages into the hub so every WebSocket
/// subscriber of a channel gets them, mirroring `_redis_subscriber`'s
/// `manager.broadcast(channel, data)` call.
async fn redis_bridge_loop(settings: Settings, hub: Hub) {
    let result = run_subscriber(&settings, move |channel, payload| {
        hub.publish(&channel, payload);
    })
    .await;
    if let Err(e) = result {
        error!(error = %e, "redis_bridge_loop_exited");
    }
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let is_ready = state.running.load(Ordering::Relaxed);
    Json(json!({ "status": if is_ready { "ready" } else { "not_ready" } }))
}

async fn component_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "channels": state.hub.channel_snapshot() }))
}

async fn ws_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    ws: WebSocketUpgrade,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, channel))
}

async fn get_trades(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Trade>>, StatusCode> {
    state
        .repo
        .get_latest_trades(&symbol.to_uppercase(), query.limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, symbol, "get_trades_failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_candles(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<CandleQuery>,
) -> Result<Json<Vec<Candle>>, StatusCode> {
    let interval = parse_interval(&query.interval).ok_or(StatusCode::BAD_REQUEST)?;
    state
        .repo
        .get_candles(&symbol.to_uppercase(), interval, query.limit)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %e, symbol, "get_candles_failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_market_stats(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let stats = state
        .repo
        .get_market_stats(&symbol.to_uppercase())
        .await
        .map_err(|e| {
            error!(error = %e, symbol, "get_market_stats_failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    match stats {
        Some(stats) => Ok(Json(json!(stats))),
        None => Err(StatusCode::NOT_FOUND),
    }
}

fn parse_interval(s: &str) -> Option<Interval> {
    Interval::from_str_opt(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interval_accepts_known_strings() {
        assert_eq!(parse_interval("1m"), Some(Interval::OneMinute));
        assert_eq!(parse_interval("1h"), Some(Interval::OneHour));
        assert_eq!(parse_interval("bogus"), None);
    }
}
