//! Tracing init and the Prometheus metrics registry.
//!
//! `init_tracing` mirrors the teacher's `tracing_subscriber::registry()` +
//! `EnvFilter` + `fmt::layer()` stack. `Telemetry::new` stands in for
//! `finstream_common.metrics.FinStreamMetrics`: every counter/gauge/
//! histogram name below matches that module's so dashboards built against
//! the Python services keep working unchanged.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub fn init_tracing(service_name: &str) {
    let default_filter = format!("{service_name}=info,tower_http=info");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Latency histogram buckets shared by every timed metric, matching
/// `LATENCY_BUCKETS` in the Python client (1ms .. 10s).
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

pub const TRADES_PRODUCED_TOTAL: &str = "finstream_trades_produced_total";
pub const CANDLES_PRODUCED_TOTAL: &str = "finstream_candles_produced_total";
pub const ALERTS_TRIGGERED_TOTAL: &str = "finstream_alerts_triggered_total";
pub const KAFKA_SEND_ERRORS_TOTAL: &str = "finstream_kafka_send_errors_total";
pub const DB_QUERIES_TOTAL: &str = "finstream_db_queries_total";
pub const WS_CONNECTIONS_ACTIVE: &str = "finstream_ws_connections_active";
pub const WS_MESSAGES_SENT_TOTAL: &str = "finstream_ws_messages_sent_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "finstream_http_request_duration_seconds";

/// Installs the Prometheus recorder and registers every metric name up
/// front so `/metrics` always exposes the full catalogue, even before
/// first use (matches `FinStreamMetrics.__init__` eagerly constructing
/// every `Counter`/`Gauge`/`Histogram`).
pub fn install_metrics_recorder(service_name: &str) -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)
        .expect("static bucket list is valid")
        .install_recorder()
        .expect("failed to install prometheus recorder");

    metrics::describe_counter!(TRADES_PRODUCED_TOTAL, "Total number of trades produced to the broker");
    metrics::describe_counter!(CANDLES_PRODUCED_TOTAL, "Total candles produced");
    metrics::describe_counter!(ALERTS_TRIGGERED_TOTAL, "Total alerts triggered");
    metrics::describe_counter!(KAFKA_SEND_ERRORS_TOTAL, "Total broker send errors");
    metrics::describe_counter!(DB_QUERIES_TOTAL, "Total database queries");
    metrics::describe_gauge!(WS_CONNECTIONS_ACTIVE, "Number of active WebSocket connections");
    metrics::describe_counter!(WS_MESSAGES_SENT_TOTAL, "Total WebSocket messages sent");
    metrics::describe_histogram!(HTTP_REQUEST_DURATION_SECONDS, "HTTP request duration");

    metrics::gauge!("finstream_service_info", "service" => service_name.to_string()).set(1.0);

    handle
}
