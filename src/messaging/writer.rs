//! Batched, optionally circuit-broken topic writer

use crate::circuit_breaker::CircuitBreaker;
use crate::error::panic_message;
use crate::messaging::broker::BrokerWriter;
use crate::messaging::completion::{default_completion, Completion};
use crate::messaging::config::WriterConfig;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::latency::now_key;
use crate::messaging::message::{inject_context, Message};
use crate::metrics::{MetricsSink, TaskMetrics};
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};

struct Pending {
    message: Message,
    ack: Option<oneshot::Sender<MessagingResult<()>>>,
}

/// Writes messages to one topic through a background batcher.
///
/// Messages are buffered until `batch_size` messages or `batch_bytes` bytes are pending,
/// or `batch_timeout` has passed since the first of them arrived. In async mode `push`
/// returns once the message is buffered and delivery outcomes surface only through the
/// completion callback; otherwise `push` waits for the batch to be written.
///
/// A configured breaker wraps `push` itself. In async mode `push` only buffers, so
/// broker errors reach the completion callback and never the breaker; it trips on
/// network errors only in sync mode.
pub struct Writer {
    topic: String,
    sender: Mutex<Option<mpsc::Sender<Pending>>>,
    batcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn BrokerWriter>,
    breaker: Option<CircuitBreaker>,
    async_mode: bool,
}

/// Builder for [`Writer`]
pub struct WriterBuilder {
    topic: String,
    sink: Arc<dyn BrokerWriter>,
    config: WriterConfig,
    completion: Option<Completion>,
    metrics: Option<Arc<dyn MetricsSink>>,
    breaker: Option<CircuitBreaker>,
}

impl WriterBuilder {
    pub fn config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default latency/metrics completion callback
    pub fn completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Metrics sink for the default completion callback
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Guard `push` with `breaker`. Only effective against broker errors in sync mode.
    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Validate the configuration and spawn the batcher. Must run inside a tokio runtime.
    pub fn build(self) -> MessagingResult<Writer> {
        if self.topic.is_empty() {
            return Err(MessagingError::Configuration(
                "writer topic must not be empty".to_string(),
            ));
        }
        self.config.validate()?;

        let completion = match self.completion {
            Some(completion) => completion,
            None => {
                let metrics = self.metrics.unwrap_or_else(|| {
                    Arc::new(TaskMetrics::new(format!("kafka.writer.{}", self.topic)))
                });
                default_completion(self.topic.clone(), metrics, self.config.slow_threshold)
            }
        };

        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        let batcher = Batcher {
            topic: self.topic.clone(),
            sink: self.sink.clone(),
            completion,
            batch_size: self.config.batch_size,
            batch_bytes: self.config.batch_bytes,
            batch_timeout: self.config.batch_timeout,
        };
        let handle = tokio::spawn(batcher.run(rx));

        info!(
            topic = %self.topic,
            async_mode = self.config.async_mode,
            batch_size = self.config.batch_size,
            breaker = self.breaker.is_some(),
            "Writer started"
        );

        Ok(Writer {
            topic: self.topic,
            sender: Mutex::new(Some(tx)),
            batcher: tokio::sync::Mutex::new(Some(handle)),
            sink: self.sink,
            breaker: self.breaker,
            async_mode: self.config.async_mode,
        })
    }
}

impl Writer {
    pub fn builder(topic: impl Into<String>, sink: Arc<dyn BrokerWriter>) -> WriterBuilder {
        WriterBuilder {
            topic: topic.into(),
            sink,
            config: WriterConfig::default(),
            completion: None,
            metrics: None,
            breaker: None,
        }
    }

    /// Topic this writer sends to
    pub fn name(&self) -> &str {
        &self.topic
    }

    /// Send `value` keyed with the current time in nanoseconds
    pub async fn push(&self, value: impl Into<Vec<u8>>) -> MessagingResult<()> {
        self.push_with_key(now_key(), value).await
    }

    pub async fn push_with_key(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> MessagingResult<()> {
        let mut message = Message::new(self.topic.clone(), key, value);
        inject_context(&mut message);

        match &self.breaker {
            Some(breaker) => {
                breaker
                    .call_with_acceptable(|| self.enqueue(message), |e| !e.is_network())
                    .await
            }
            None => self.enqueue(message).await,
        }
    }

    async fn enqueue(&self, message: Message) -> MessagingResult<()> {
        let sender = self
            .sender
            .lock()
            .as_ref()
            .cloned()
            .ok_or(MessagingError::Closed)?;

        if self.async_mode {
            return sender
                .send(Pending { message, ack: None })
                .await
                .map_err(|_| MessagingError::Closed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        sender
            .send(Pending {
                message,
                ack: Some(ack_tx),
            })
            .await
            .map_err(|_| MessagingError::Closed)?;

        ack_rx.await.map_err(|_| MessagingError::Closed)?
    }

    /// Flush buffered messages, stop the batcher and close the broker client.
    ///
    /// Pushes after `close` fail with [`MessagingError::Closed`].
    pub async fn close(&self) -> MessagingResult<()> {
        self.sender.lock().take();

        if let Some(handle) = self.batcher.lock().await.take() {
            if let Err(e) = handle.await {
                error!(topic = %self.topic, error = %e, "Writer batcher task failed");
            }
        }

        self.sink.close().await
    }
}

struct Batcher {
    topic: String,
    sink: Arc<dyn BrokerWriter>,
    completion: Completion,
    batch_size: usize,
    batch_bytes: usize,
    batch_timeout: Duration,
}

impl Batcher {
    async fn run(self, mut rx: mpsc::Receiver<Pending>) {
        let mut batch: Vec<Pending> = Vec::with_capacity(self.batch_size);
        let mut bytes = 0usize;
        let mut deadline: Option<Instant> = None;

        loop {
            let next = match deadline {
                None => rx.recv().await,
                Some(at) => tokio::select! {
                    next = rx.recv() => next,
                    _ = tokio::time::sleep_until(at) => {
                        self.flush(&mut batch).await;
                        bytes = 0;
                        deadline = None;
                        continue;
                    }
                },
            };

            let Some(pending) = next else {
                break;
            };

            if batch.is_empty() {
                deadline = Some(Instant::now() + self.batch_timeout);
            }
            bytes += pending.message.size();
            batch.push(pending);

            if batch.len() >= self.batch_size || bytes >= self.batch_bytes {
                self.flush(&mut batch).await;
                bytes = 0;
                deadline = None;
            }
        }

        self.flush(&mut batch).await;
        info!(topic = %self.topic, "Writer batcher stopped");
    }

    async fn flush(&self, batch: &mut Vec<Pending>) {
        if batch.is_empty() {
            return;
        }

        let (mut messages, acks): (Vec<Message>, Vec<_>) =
            batch.drain(..).map(|p| (p.message, p.ack)).unzip();

        let result = self.sink.write_messages(&mut messages).await;

        let completion = &self.completion;
        let err = result.as_ref().err();
        if let Err(panic) =
            std::panic::catch_unwind(AssertUnwindSafe(|| completion(&messages, err)))
        {
            error!(
                topic = %self.topic,
                batch = messages.len(),
                panic = %panic_message(panic.as_ref()),
                "Writer completion callback panicked"
            );
        }

        for ack in acks.into_iter().flatten() {
            let _ = ack.send(result.clone());
        }
    }
}
