//! Per-topic writer registry with a JSON envelope

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::messaging::broker::BrokerWriter;
use crate::messaging::config::WriterConfig;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::writer::Writer;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;
use tracing::{error, info};

/// Wire shape of everything sent through [`Producer::push`]
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize + ?Sized> {
    pub topic: &'a str,
    /// `file:line` of the call site
    pub from: &'a str,
    /// Unix seconds
    pub timestamp: i64,
    pub data: &'a T,
}

/// Lazily creates one [`Writer`] per topic over a shared broker client
pub struct Producer {
    sink: Arc<dyn BrokerWriter>,
    config: WriterConfig,
    breaker_config: Option<CircuitBreakerConfig>,
    writers: DashMap<String, Arc<Writer>>,
}

impl Producer {
    pub fn new(sink: Arc<dyn BrokerWriter>, config: WriterConfig) -> MessagingResult<Self> {
        config.validate()?;
        Ok(Self {
            sink,
            config,
            breaker_config: None,
            writers: DashMap::new(),
        })
    }

    /// Guard every writer with its own breaker named `kafka.writer.<topic>`
    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> MessagingResult<Self> {
        config.validate()?;
        self.breaker_config = Some(config);
        Ok(self)
    }

    /// Writer for `topic`, created on first use
    pub fn writer(&self, topic: &str) -> MessagingResult<Arc<Writer>> {
        if topic.is_empty() {
            return Err(MessagingError::Configuration(
                "topic must not be empty".to_string(),
            ));
        }
        if let Some(writer) = self.writers.get(topic) {
            return Ok(writer.clone());
        }

        match self.writers.entry(topic.to_string()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let mut builder =
                    Writer::builder(topic, self.sink.clone()).config(self.config.clone());
                if let Some(breaker) = &self.breaker_config {
                    builder = builder.breaker(CircuitBreaker::new(
                        format!("kafka.writer.{}", topic),
                        breaker.clone(),
                    ));
                }
                let writer = Arc::new(builder.build()?);
                e.insert(writer.clone());
                Ok(writer)
            }
        }
    }

    /// Serialize `data` into an [`Envelope`] stamped with the caller's location and push it.
    ///
    /// Serialization happens before the returned future is first polled.
    #[track_caller]
    pub fn push<'a, T: Serialize + ?Sized>(
        &'a self,
        topic: &'a str,
        data: &T,
    ) -> impl Future<Output = MessagingResult<()>> + 'a {
        let caller = Location::caller();
        let from = format!("{}:{}", caller.file(), caller.line());
        let payload = serde_json::to_vec(&Envelope {
            topic,
            from: &from,
            timestamp: Utc::now().timestamp(),
            data,
        });

        self.push_payload(topic, payload.map_err(MessagingError::from))
    }

    async fn push_payload(
        &self,
        topic: &str,
        payload: MessagingResult<Vec<u8>>,
    ) -> MessagingResult<()> {
        self.push_raw(topic, payload?).await
    }

    /// Push bytes as-is
    pub async fn push_raw(&self, topic: &str, value: impl Into<Vec<u8>>) -> MessagingResult<()> {
        self.writer(topic)?.push(value).await
    }

    /// Topics with a live writer
    pub fn topics(&self) -> Vec<String> {
        self.writers.iter().map(|e| e.key().clone()).collect()
    }

    /// Close every writer, flushing what they have buffered
    pub async fn close(&self) -> MessagingResult<()> {
        let writers: Vec<Arc<Writer>> = self.writers.iter().map(|e| e.value().clone()).collect();
        self.writers.clear();

        let mut first_err = None;
        for writer in writers {
            if let Err(e) = writer.close().await {
                error!(topic = %writer.name(), error = %e, "Writer close failed");
                first_err.get_or_insert(e);
            }
        }
        info!("Producer closed");

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::Message;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        sent: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl BrokerWriter for CapturingSink {
        async fn write_messages(&self, messages: &mut [Message]) -> MessagingResult<()> {
            self.sent.lock().extend(messages.iter().cloned());
            Ok(())
        }

        async fn close(&self) -> MessagingResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_push_wraps_envelope() {
        let sink = Arc::new(CapturingSink::default());
        let producer = Producer::new(
            sink.clone(),
            WriterConfig {
                async_mode: false,
                batch_size: 1,
                ..Default::default()
            },
        )
        .unwrap();

        producer
            .push("orders", &serde_json::json!({"id": 7}))
            .await
            .unwrap();

        let sent = sink.sent.lock();
        assert_eq!(sent.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&sent[0].value).unwrap();
        assert_eq!(body["topic"], "orders");
        assert_eq!(body["data"]["id"], 7);
        assert!(body["from"].as_str().unwrap().contains("producer.rs:"));
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_writer_reused_per_topic() {
        let sink = Arc::new(CapturingSink::default());
        let producer = Producer::new(sink, WriterConfig::default()).unwrap();

        let a = producer.writer("a").unwrap();
        let again = producer.writer("a").unwrap();
        producer.writer("b").unwrap();

        assert!(Arc::ptr_eq(&a, &again));
        let mut topics = producer.topics();
        topics.sort();
        assert_eq!(topics, vec!["a", "b"]);
        assert!(producer.writer("").is_err());

        producer.close().await.unwrap();
        assert!(producer.topics().is_empty());
    }
}
