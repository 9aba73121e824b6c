//! FinStream library: shared types and stages for the market-data
//! streaming pipeline. Each `src/bin/*.rs` binary wires a subset of these
//! modules into a standalone service.

pub mod aggregator;
pub mod broker;
pub mod config;
pub mod decimal;
pub mod detector;
pub mod error;
pub mod http;
pub mod hub;
pub mod models;
pub mod price_engine;
pub mod pubsub;
pub mod telemetry;
pub mod timeseries;
