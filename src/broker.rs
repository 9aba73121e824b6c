//! Kafka-backed event publisher/consumer.
//!
//! Rust analogue of `finstream_common.kafka`'s `KafkaProducer`/
//! `KafkaConsumer`, built on `rdkafka`'s async `FutureProducer` /
//! `StreamConsumer` instead of `aiokafka`.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::message::{Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::error::FinStreamError;

/// Wraps `rdkafka::producer::FutureProducer` with the batching/retry
/// knobs the Python producer exposes.
pub struct Producer {
    inner: FutureProducer,
}

impl Producer {
    pub fn new(settings: &Settings) -> Result<Self, FinStreamError> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &settings.kafka_bootstrap_servers)
            .set("acks", &settings.kafka_producer_acks)
            .set("retries", settings.kafka_producer_retries.to_string())
            .set("linger.ms", settings.kafka_producer_linger_ms.to_string())
            .set(
                "batch.size",
                settings.kafka_producer_batch_size.to_string(),
            )
            .set(
                "compression.type",
                &settings.kafka_producer_compression_type,
            )
            .create()
            .map_err(|e| FinStreamError::Fatal(format!("kafka producer config: {e}")))?;

        info!(bootstrap_servers = %settings.kafka_bootstrap_servers, "kafka_producer_started");
        Ok(Self { inner })
    }

    /// Send one message, keyed by `key` (the uppercase symbol for market
    /// events), retrying internally per `rdkafka`'s own retry policy.
    /// `headers` carries trace context (§6: "optional headers may carry
    /// `trace_id`") alongside the JSON value without duplicating it on
    /// every consumer that only cares about the payload.
    pub async fn send(
        &self,
        topic: &str,
        value: &[u8],
        key: Option<&str>,
        headers: Option<OwnedHeaders>,
    ) -> Result<(), FinStreamError> {
        let mut record = FutureRecord::to(topic).payload(value);
        if let Some(k) = key {
            record = record.key(k);
        }
        if let Some(h) = headers {
            record = record.headers(h);
        }

        match self.inner.send(record, Duration::from_secs(10)).await {
            Ok((partition, offset)) => {
                debug!(topic, partition, offset, "kafka_message_sent");
                Ok(())
            }
            Err((e, _)) => {
                error!(topic, key, error = %e, "kafka_send_failed");
                Err(FinStreamError::from(e))
            }
        }
    }

    /// Send a batch, returning once every message has been handed to the
    /// producer's internal queue (mirrors `send_batch` + `flush`).
    pub async fn send_batch(
        &self,
        topic: &str,
        messages: Vec<(Option<String>, Vec<u8>)>,
    ) -> Result<usize, FinStreamError> {
        let mut sent = 0;
        for (key, value) in messages {
            self.send(topic, &value, key.as_deref(), None).await?;
            sent += 1;
        }
        Ok(sent)
    }

    pub fn send_model<T: serde::Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, FinStreamError> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Flushes every record still buffered in the producer's internal
    /// queue, blocking up to `timeout`. Called on shutdown so a stop
    /// signal never drops in-flight messages (§5: "close the broker
    /// producer (which flushes pending records)").
    pub fn flush(&self, timeout: Duration) -> Result<(), FinStreamError> {
        use rdkafka::producer::Producer as _;
        self.inner
            .flush(timeout)
            .map_err(|e| FinStreamError::Transient(format!("kafka producer flush: {e}")))
    }
}

/// Wraps `rdkafka::consumer::StreamConsumer` with group-id/offset-reset
/// configuration sourced from `Settings`.
pub struct EventConsumer {
    inner: StreamConsumer,
}

impl EventConsumer {
    pub fn new(settings: &Settings, topics: &[&str]) -> Result<Self, FinStreamError> {
        let inner: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &settings.kafka_bootstrap_servers)
            .set("group.id", &settings.kafka_consumer_group_id)
            .set(
                "auto.offset.reset",
                &settings.kafka_consumer_auto_offset_reset,
            )
            .set(
                "enable.auto.commit",
                settings.kafka_consumer_enable_auto_commit.to_string(),
            )
            .set(
                "max.poll.records",
                settings.kafka_consumer_max_poll_records.to_string(),
            )
            .create()
            .map_err(|e| FinStreamError::Fatal(format!("kafka consumer config: {e}")))?;

        inner
            .subscribe(topics)
            .map_err(|e| FinStreamError::Fatal(format!("kafka subscribe: {e}")))?;

        info!(topics = ?topics, group_id = %settings.kafka_consumer_group_id, "kafka_consumer_started");
        Ok(Self { inner })
    }

    /// Pull the next message off the stream, including its partition and
    /// offset so a deserialization failure can be logged with both per
    /// §7.2 ("Logged with offset; the message is skipped").
    pub async fn recv(&self) -> Result<ConsumedMessage, FinStreamError> {
        let message = self.inner.recv().await.map_err(FinStreamError::from)?;

        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).to_string());
        let payload = message.payload().unwrap_or_default().to_vec();
        Ok(ConsumedMessage {
            key,
            payload,
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    /// Counts headers on a borrowed header set, e.g. the `trace_id`
    /// header `trace_headers` attaches to a produced trade.
    pub fn header_count(headers: Option<&OwnedHeaders>) -> usize {
        headers.map(|h| h.count()).unwrap_or(0)
    }

    /// Commits offsets for every message delivered so far. Called every
    /// `INSERT_BATCH_SIZE` (100) successfully-aggregated messages rather
    /// than after each one, so a crash mid-batch redelivers the tail —
    /// absorbed downstream by the sink's idempotency keys.
    pub fn commit(&self) -> Result<(), FinStreamError> {
        match self.inner.commit_consumer_state(CommitMode::Async) {
            Ok(()) => Ok(()),
            Err(rdkafka::error::KafkaError::ConsumerCommit(
                rdkafka::types::RDKafkaErrorCode::NoOffset,
            )) => Ok(()),
            Err(e) => Err(FinStreamError::Transient(format!("kafka commit: {e}"))),
        }
    }

    /// Per the Python client, computing real consumer lag needs the
    /// high-water mark compared against committed offsets — left
    /// unimplemented upstream and carried here for interface parity only.
    pub fn get_lag(&self) -> std::collections::HashMap<String, i64> {
        std::collections::HashMap::new()
    }
}

/// Builds a single-header `trace_id` header set for `Producer::send`,
/// the wire carrier for `Trade.trace_id` (§3/§6).
pub fn trace_headers(trace_id: &str) -> OwnedHeaders {
    OwnedHeaders::new().insert(rdkafka::message::Header {
        key: "trace_id",
        value: Some(trace_id),
    })
}

/// One message pulled off a topic: payload plus enough position
/// information (`partition`, `offset`) to log it per §7.2 if decoding
/// fails.
#[derive(Debug, Clone)]
pub struct ConsumedMessage {
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_count_handles_absent_headers() {
        assert_eq!(EventConsumer::header_count(None), 0);
    }
}
