//! Fetch/consume/commit pipeline
//!
//! `fetchers` tasks pull from the broker into one bounded channel that `consumers`
//! tasks drain. Each consumer runs the handler, then commits the message whatever the
//! handler returned. Failed messages are therefore not redelivered; they show up in
//! logs and in the `drop` count of the business metric.

use crate::error::panic_message;
use crate::messaging::broker::BrokerReader;
use crate::messaging::config::ReaderConfig;
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::latency::duration_from_key;
use crate::messaging::message::{extract_context, Message};
use crate::metrics::{MetricsSink, TaskMetrics, TaskSample};
use async_trait::async_trait;
use futures::FutureExt as _;
use opentelemetry::trace::FutureExt as _;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const FETCH_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Processes one fetched message
#[async_trait]
pub trait ConsumeHandler: Send + Sync + 'static {
    async fn consume(&self, message: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> ConsumeHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn consume(&self, message: Message) -> anyhow::Result<()> {
        (self)(message).await
    }
}

struct Inner {
    topic: String,
    group: String,
    broker: Arc<dyn BrokerReader>,
    handler: Arc<dyn ConsumeHandler>,
    config: ReaderConfig,
    flow_metrics: Arc<dyn MetricsSink>,
    biz_metrics: Arc<dyn MetricsSink>,
}

/// Consumer-group reader for one topic
pub struct Reader {
    inner: Arc<Inner>,
    started: AtomicBool,
}

/// Builder for [`Reader`]
pub struct ReaderBuilder {
    topic: String,
    group: String,
    broker: Arc<dyn BrokerReader>,
    handler: Arc<dyn ConsumeHandler>,
    config: ReaderConfig,
    flow_metrics: Option<Arc<dyn MetricsSink>>,
    biz_metrics: Option<Arc<dyn MetricsSink>>,
}

impl ReaderBuilder {
    pub fn config(mut self, config: ReaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Sink for producer-to-consumer latency; defaults to `kafka.reader.flow.<group>`
    pub fn flow_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.flow_metrics = Some(metrics);
        self
    }

    /// Sink for handler duration and failures; defaults to `kafka.reader.biz.<group>`
    pub fn biz_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.biz_metrics = Some(metrics);
        self
    }

    pub fn build(self) -> MessagingResult<Reader> {
        if self.topic.is_empty() || self.group.is_empty() {
            return Err(MessagingError::Configuration(
                "reader topic and group must not be empty".to_string(),
            ));
        }
        self.config.validate()?;

        let flow_metrics = self.flow_metrics.unwrap_or_else(|| {
            Arc::new(TaskMetrics::new(format!("kafka.reader.flow.{}", self.group)))
        });
        let biz_metrics = self.biz_metrics.unwrap_or_else(|| {
            Arc::new(TaskMetrics::new(format!("kafka.reader.biz.{}", self.group)))
        });

        Ok(Reader {
            inner: Arc::new(Inner {
                topic: self.topic,
                group: self.group,
                broker: self.broker,
                handler: self.handler,
                config: self.config,
                flow_metrics,
                biz_metrics,
            }),
            started: AtomicBool::new(false),
        })
    }
}

impl Reader {
    pub fn builder<H: ConsumeHandler>(
        topic: impl Into<String>,
        group: impl Into<String>,
        broker: Arc<dyn BrokerReader>,
        handler: H,
    ) -> ReaderBuilder {
        ReaderBuilder {
            topic: topic.into(),
            group: group.into(),
            broker,
            handler: Arc::new(handler),
            config: ReaderConfig::default(),
            flow_metrics: None,
            biz_metrics: None,
        }
    }

    /// Topic being consumed
    pub fn name(&self) -> &str {
        &self.inner.topic
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// Run the pipeline until the broker is closed.
    ///
    /// Returns after every fetcher has stopped and every buffered message has been
    /// handled and committed. A reader can only be started once.
    pub async fn start(&self) -> MessagingResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::Configuration(format!(
                "reader {}/{} already started",
                self.inner.topic, self.inner.group
            )));
        }

        let config = &self.inner.config;
        let (tx, rx) = mpsc::channel::<Message>(config.channel_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        info!(
            topic = %self.inner.topic,
            group = %self.inner.group,
            fetchers = config.fetchers,
            consumers = config.consumers,
            "Reader started"
        );

        let mut consumers = JoinSet::new();
        for id in 0..config.consumers {
            let inner = self.inner.clone();
            let rx = rx.clone();
            consumers.spawn(async move { inner.consume_loop(id, rx).await });
        }

        let mut fetchers = JoinSet::new();
        for id in 0..config.fetchers {
            let inner = self.inner.clone();
            let tx = tx.clone();
            fetchers.spawn(async move { inner.fetch_loop(id, tx).await });
        }
        drop(tx);

        while let Some(res) = fetchers.join_next().await {
            if let Err(e) = res {
                error!(topic = %self.inner.topic, error = %e, "Fetcher task failed");
            }
        }

        while let Some(res) = consumers.join_next().await {
            if let Err(e) = res {
                error!(topic = %self.inner.topic, error = %e, "Consumer task failed");
            }
        }

        let finalized = self.inner.broker.finalize().await;
        info!(topic = %self.inner.topic, group = %self.inner.group, "Reader closed");
        finalized
    }

    /// Close the broker client. `start` returns once the pipeline has drained.
    pub async fn stop(&self) -> MessagingResult<()> {
        self.inner.broker.close().await
    }
}

impl Inner {
    async fn fetch_loop(&self, id: usize, tx: mpsc::Sender<Message>) {
        loop {
            match self.broker.fetch_message().await {
                Ok(msg) => {
                    if tx.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(MessagingError::Closed) => {
                    info!(topic = %self.topic, fetcher = id, "Fetcher stopped");
                    break;
                }
                Err(e) => {
                    error!(topic = %self.topic, fetcher = id, error = %e, "Fetch failed");
                    tokio::time::sleep(FETCH_RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn consume_loop(&self, id: usize, rx: Arc<Mutex<mpsc::Receiver<Message>>>) {
        loop {
            let next = rx.lock().await.recv().await;
            let Some(msg) = next else {
                break;
            };

            if let Err(e) = self.consume_one(&msg).await {
                error!(
                    topic = %self.topic,
                    group = %self.group,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %e,
                    "Message handling failed"
                );
            }

            if let Err(e) = self
                .broker
                .commit_messages(std::slice::from_ref(&msg))
                .await
            {
                error!(
                    topic = %self.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %e,
                    "Commit failed"
                );
            }
        }
        debug!(topic = %self.topic, consumer = id, "Consumer drained");
    }

    async fn consume_one(&self, msg: &Message) -> MessagingResult<()> {
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.run_handler(msg.clone()))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(MessagingError::Consume(format!("{:#}", e))),
            Err(panic) => Err(MessagingError::Panicked(panic_message(panic.as_ref()))),
        };

        self.biz_metrics
            .add(TaskSample::new(started.elapsed(), result.is_err()));
        result
    }

    async fn run_handler(&self, mut msg: Message) -> anyhow::Result<()> {
        let cx = extract_context(&mut msg);

        if let Some(latency) = duration_from_key(&msg.key, SystemTime::now()) {
            self.flow_metrics.add(TaskSample::new(latency, false));
            if self.config.slow_threshold.is_some_and(|t| latency > t) {
                warn!(
                    target: "mq_relay::slow",
                    topic = %self.topic,
                    group = %self.group,
                    partition = msg.partition,
                    offset = msg.offset,
                    key = %msg.key_str(),
                    duration_ms = latency.as_millis() as u64,
                    "kafka.reader.consume slow"
                );
            }
        }

        self.handler.consume(msg).with_context(cx).await
    }
}
