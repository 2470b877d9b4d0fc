//! # mq-relay
//!
//! Delayed delivery and batched publishing on top of Redis and Kafka.
//!
//! - [`delay`]: sharded Redis delay queue with bounded retry
//! - [`messaging`]: batched Kafka writer, per-topic producer and consumer pipeline
//! - [`relay`]: forwards due delayed items through the producer
//! - [`circuit_breaker`]: breaker guarding the writers
//! - [`config`], [`telemetry`], [`metrics`]: ambient plumbing

pub mod circuit_breaker;
pub mod config;
pub mod delay;
pub mod error;
pub mod messaging;
pub mod metrics;
pub mod relay;
pub mod telemetry;

pub use error::{AppError, Result};
