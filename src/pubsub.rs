//! Redis pub/sub fan-out.
//!
//! Rust analogue of the `redis.asyncio` usage in `api-gateway/app/main.py`:
//! the stream-processor/alert-service publish onto `trades:<SYM>`,
//! `quotes:<SYM>`, `alerts:<SYM>`/`alerts:all` channels, and the gateway's
//! `_redis_subscriber` pattern-subscribes to relay messages to WebSocket
//! clients via [`crate::hub::Hub`].

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{error, warn};

use crate::config::Settings;
use crate::error::FinStreamError;

#[derive(Clone)]
pub struct Publisher {
    conn: ConnectionManager,
}

impl Publisher {
    pub async fn connect(settings: &Settings) -> Result<Self, FinStreamError> {
        let client = redis::Client::open(settings.redis_url.clone())
            .map_err(|e| FinStreamError::Fatal(format!("redis url: {e}")))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<(), FinStreamError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.publish(channel, payload).await?;
        Ok(())
    }
}

/// Subscribes to the channel patterns the gateway needs
/// (`trades:*`, `quotes:*`, `alerts:*`) and forwards every message to
/// `on_message`, reconnecting after a one-second backoff on error —
/// matching `_redis_subscriber`'s `except Exception: sleep(1)` loop.
pub async fn run_subscriber<F>(settings: &Settings, mut on_message: F) -> Result<(), FinStreamError>
where
    F: FnMut(String, Vec<u8>) + Send,
{
    let client = redis::Client::open(settings.redis_url.clone())
        .map_err(|e| FinStreamError::Fatal(format!("redis url: {e}")))?;

    loop {
        let pubsub_result = client.get_async_pubsub().await;
        let mut pubsub = match pubsub_result {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "redis_subscriber_connect_failed");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        if let Err(e) = pubsub.psubscribe("trades:*").await {
            error!(error = %e, "redis_psubscribe_failed");
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            continue;
        }
        let _ = pubsub.psubscribe("quotes:*").await;
        let _ = pubsub.psubscribe("alerts:*").await;

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            let payload: Vec<u8> = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "redis_payload_decode_failed");
                    continue;
                }
            };
            on_message(channel, payload);
        }

        warn!("redis_subscriber_stream_ended");
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

/// Builds the channel name for a trade/quote/alert event, e.g.
/// `trades:AAPL`, `alerts:all`.
pub fn channel_for(kind: &str, symbol: Option<&str>) -> String {
    match symbol {
        Some(sym) => format!("{kind}:{sym}"),
        None => format!("{kind}:all"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_naming_matches_gateway_convention() {
        assert_eq!(channel_for("trades", Some("AAPL")), "trades:AAPL");
        assert_eq!(channel_for("alerts", None), "alerts:all");
    }
}
