//! Live Broadcast Hub: channel-keyed WebSocket fan-out.
//!
//! Generalizes the teacher's single `broadcast::Sender<WsServerEvent>` +
//! `handle_socket`/`websocket_broadcaster` pair into the channel-keyed
//! `ConnectionManager` the Python `api-gateway/app/main.py` implements
//! (`trades:<SYM>`, `quotes:<SYM>`, `alerts:<SYM>`, `alerts:all`). Ingress
//! comes from Redis (`pubsub::run_subscriber`); each channel gets its own
//! `tokio::sync::broadcast` ring so a slow client on `trades:AAPL` never
//! backs up `alerts:all`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 1024;

/// Channel -> subscriber-set, implemented as one `broadcast` ring per
/// channel created lazily on first subscribe or publish.
#[derive(Clone, Default)]
pub struct Hub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Vec<u8>> {
        if let Some(tx) = self.channels.read().get(channel) {
            return tx.clone();
        }
        let mut channels = self.channels.write();
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish raw JSON bytes onto a channel. Silently succeeds with no
    /// subscribers (mirrors the Python `ConnectionManager.broadcast`
    /// `try/except: pass` around each `send_text`).
    pub fn publish(&self, channel: &str, payload: Vec<u8>) {
        let tx = self.sender_for(channel);
        let receiver_count = tx.receiver_count();
        if receiver_count == 0 {
            return;
        }
        if tx.send(payload).is_err() {
            debug!(channel, "hub_publish_no_receivers");
        }
        metrics::counter!(crate::telemetry::WS_MESSAGES_SENT_TOTAL, "channel" => channel.to_string())
            .increment(1);
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<Vec<u8>> {
        self.sender_for(channel).subscribe()
    }

    /// Snapshot for the gateway's `/stats` endpoint: channel name to
    /// current subscriber count.
    pub fn channel_snapshot(&self) -> HashMap<String, usize> {
        self.channels
            .read()
            .iter()
            .map(|(channel, tx)| (channel.clone(), tx.receiver_count()))
            .collect()
    }
}

/// Drives one accepted WebSocket connection subscribed to a single
/// channel: forwards hub messages to the client, answers ping/pong,
/// and exits on `Message::Close` — the same shape as the teacher's
/// `handle_socket`, minus the signal-replay-on-connect step (this pipeline
/// has no durable per-connection backlog to replay).
pub async fn handle_socket(mut socket: WebSocket, hub: Hub, channel: String) {
    let mut rx = hub.subscribe(&channel);
    metrics::gauge!(crate::telemetry::WS_CONNECTIONS_ACTIVE, "channel" => channel.clone()).increment(1.0);
    info!(channel = %channel, "ws_connected");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(payload) => {
                        if socket.send(Message::Binary(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped, "ws_subscriber_lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text == "ping" {
                            let _ = socket.send(Message::Text("pong".to_string())).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    metrics::gauge!(crate::telemetry::WS_CONNECTIONS_ACTIVE, "channel" => channel.clone()).decrement(1.0);
    info!(channel = %channel, "ws_disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let hub = Hub::new();
        hub.publish("trades:AAPL", b"{}".to_vec());
    }

    #[tokio::test]
    async fn subscriber_receives_published_payload() {
        let hub = Hub::new();
        let mut rx = hub.subscribe("alerts:all");
        hub.publish("alerts:all", b"hello".to_vec());
        let received = rx.recv().await.unwrap();
        assert_eq!(received, b"hello");
    }
}
