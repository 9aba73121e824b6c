//! Crate-wide error type.
//!
//! Module boundaries (broker, timeseries, pubsub, wire parsing) return
//! `FinStreamError` so callers can match on kind; orchestration code at
//! the `main.rs` level uses `anyhow::Result` and `?` straight through.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FinStreamError {
    /// Retryable failure: broker unreachable, pool exhausted, connection reset.
    #[error("transient error: {0}")]
    Transient(String),

    /// Malformed or unparseable wire payload.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Well-formed input that violates a domain invariant (unknown symbol,
    /// out-of-order timestamp, negative size).
    #[error("logical error: {0}")]
    Logical(String),

    /// Unrecoverable: config missing, schema mismatch, auth failure.
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl FinStreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FinStreamError::Transient(_))
    }
}

impl From<serde_json::Error> for FinStreamError {
    fn from(e: serde_json::Error) -> Self {
        FinStreamError::Deserialization(e.to_string())
    }
}

impl From<sqlx::Error> for FinStreamError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                FinStreamError::Transient(e.to_string())
            }
            _ => FinStreamError::Fatal(e.to_string()),
        }
    }
}

impl From<redis::RedisError> for FinStreamError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
            FinStreamError::Transient(e.to_string())
        } else {
            FinStreamError::Fatal(e.to_string())
        }
    }
}

impl From<rdkafka::error::KafkaError> for FinStreamError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        FinStreamError::Transient(e.to_string())
    }
}
