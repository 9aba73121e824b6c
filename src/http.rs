//! Ambient HTTP surface shared by every binary: health/ready/metrics
//! routes and the request-logging middleware.
//!
//! The middleware is carried over from the teacher's
//! `middleware::logging::request_logging_simple` unchanged in behavior.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info, warn};

/// Logs every HTTP request with method, path, status and latency, skipping
/// `/health` to cut noise, exactly as the teacher's
/// `request_logging_simple` does.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(%method, %path, status, latency_ms = latency.as_millis() as u64, "Request failed (5xx)");
    } else {
        info!(%method, %path, status, latency_ms = latency.as_millis() as u64, "Request completed");
    }

    response
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Builds `/health` (liveness) and `/metrics` (Prometheus) for a given
/// service. `/ready` is added separately per-binary since readiness
/// depends on that binary's own dependencies (broker, db, redis). Generic
/// over `S` so it merges into whichever `AppState` router each binary
/// builds (`Router<()>` can't convert into `Router<AppState>`).
pub fn ambient_routes<S>(metrics_handle: PrometheusHandle) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        )
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM — whichever arrives first —
/// and flips `running` to `false` before returning so every background
/// loop polling it observes the stop request. Passed to
/// `axum::serve(...).with_graceful_shutdown(...)` by every binary so the
/// server stops accepting new connections at the same moment the
/// producer/consumer loops start winding down, per §5's shutdown sequence.
pub async fn shutdown_signal(running: Arc<AtomicBool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(signal = "ctrl_c", "shutdown_signal_received"),
        _ = terminate => info!(signal = "sigterm", "shutdown_signal_received"),
    }

    running.store(false, Ordering::SeqCst);
}
