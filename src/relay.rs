//! Wires a [`Delayer`] to a [`Producer`]: due items are published to their destination topic.

use crate::config::Config;
use crate::delay::{DelayHandler, DelayStore, DelayedItem, Delayer, DelayerHandle, RedisDelayStore};
use crate::error::Result;
use crate::messaging::{KafkaSink, Producer, WriterConfig};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Forwards due items through the producer envelope
#[derive(Clone)]
pub struct DelayRelay {
    producer: Arc<Producer>,
}

impl DelayRelay {
    pub fn new(producer: Arc<Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl DelayHandler for DelayRelay {
    async fn handle(&self, item: DelayedItem) -> anyhow::Result<()> {
        self.producer.push(&item.destination, &item.payload).await?;
        Ok(())
    }
}

pub struct Relay {
    delayer: Delayer,
    producer: Arc<Producer>,
    handle: Option<DelayerHandle>,
}

impl Relay {
    pub fn new(delayer: Delayer, producer: Arc<Producer>) -> Self {
        Self {
            delayer,
            producer,
            handle: None,
        }
    }

    /// Connect to Redis and Kafka as configured
    pub async fn connect(config: &Config) -> Result<Self> {
        let store: Arc<dyn DelayStore> = Arc::new(RedisDelayStore::new(&config.redis.url).await?);
        let delayer = Delayer::new(store, (&config.delay).into())?;

        let writer_config: WriterConfig = (&config.writer).into();
        let sink = Arc::new(KafkaSink::new(&config.kafka_connection()?, &writer_config)?);
        let mut producer = Producer::new(sink, writer_config)?;
        if let Some(breaker) = config.breaker.to_config() {
            producer = producer.with_breaker(breaker)?;
        }

        Ok(Self::new(delayer, Arc::new(producer)))
    }

    pub fn delayer(&self) -> &Delayer {
        &self.delayer
    }

    pub fn producer(&self) -> &Arc<Producer> {
        &self.producer
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Start forwarding due items. A second call is a no-op.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("Relay already started");
            return;
        }
        let handler = DelayRelay::new(self.producer.clone());
        self.handle = Some(self.delayer.start(handler));
        info!("Relay started");
    }

    /// Publish `data` to `topic` once `delay` has elapsed; returns the fire time
    pub async fn push_delay<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        data: &T,
        delay: Duration,
    ) -> Result<i64> {
        self.delayer.push(topic, data, delay).await
    }

    /// Stop the scheduler after its current tick, then flush and close every writer
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.shutdown().await?;
        }
        self.producer.close().await?;
        info!("Relay stopped");
        Ok(())
    }
}
