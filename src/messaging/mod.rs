//! Kafka producer and consumer pipeline
//!
//! # Architecture
//!
//! ```text
//!  Producer ──► Writer (per topic) ──► batcher ──► BrokerWriter (KafkaSink)
//!                                         │
//!                                         └──► Completion (latency, drops, slow log)
//!
//!  BrokerReader (KafkaFetcher) ──► fetchers ──► bounded channel ──► consumers
//!                                                                   │
//!                                                   handler, then commit
//! ```
//!
//! Message keys written by [`Writer::push`] carry the send time in nanoseconds; the
//! completion callback and the reader decode it to measure latency.
//!
//! # Example
//!
//! ```no_run
//! use mq_relay::messaging::{KafkaConnection, KafkaSink, Producer, WriterConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), mq_relay::messaging::MessagingError> {
//! let conn = KafkaConnection::new(vec!["localhost:9092".to_string()]);
//! let config = WriterConfig::default();
//! let sink = Arc::new(KafkaSink::new(&conn, &config)?);
//!
//! let producer = Producer::new(sink, config)?;
//! producer.push("orders", &serde_json::json!({"id": 7})).await?;
//! producer.close().await?;
//! # Ok(())
//! # }
//! ```

mod broker;
mod completion;
mod config;
mod error;
mod kafka;
mod latency;
mod message;
mod producer;
mod reader;
mod writer;

pub use broker::{BrokerReader, BrokerWriter};
pub use completion::{default_completion, Completion};
pub use config::{
    KafkaConnection, ReaderConfig, RequiredAcks, SaslConfig, StartOffset, WriterConfig,
};
pub use error::{MessagingError, MessagingResult};
pub use kafka::{client_config, KafkaFetcher, KafkaSink};
pub use latency::{duration_from_key, key_at, now_key};
pub use message::{extract_context, inject_context, Header, Message, MessageCarrier};
pub use producer::{Envelope, Producer};
pub use reader::{ConsumeHandler, Reader, ReaderBuilder};
pub use writer::{Writer, WriterBuilder};
