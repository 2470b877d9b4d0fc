//! Delivery completion callbacks

use crate::messaging::error::MessagingError;
use crate::messaging::latency::duration_from_key;
use crate::messaging::message::Message;
use crate::metrics::{MetricsSink, TaskSample};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, warn};

/// Invoked by the writer once per batch, after it has been delivered or has failed
pub type Completion = Arc<dyn Fn(&[Message], Option<&MessagingError>) + Send + Sync>;

/// Latency and failure accounting for delivered batches.
///
/// Every message whose key is a latency token yields one `(latency, failed)` sample;
/// messages above `slow_threshold` are also written to the slow log.
pub fn default_completion(
    topic: impl Into<String>,
    metrics: Arc<dyn MetricsSink>,
    slow_threshold: Option<Duration>,
) -> Completion {
    let topic = topic.into();
    Arc::new(move |messages: &[Message], err: Option<&MessagingError>| {
        let now = SystemTime::now();
        for msg in messages {
            if let Some(latency) = duration_from_key(&msg.key, now) {
                metrics.add(TaskSample::new(latency, err.is_some()));

                if slow_threshold.is_some_and(|t| latency > t) {
                    warn!(
                        target: "mq_relay::slow",
                        topic = %topic,
                        partition = msg.partition,
                        offset = msg.offset,
                        key = %msg.key_str(),
                        duration_ms = latency.as_millis() as u64,
                        failed = err.is_some(),
                        "kafka.writer.completion slow"
                    );
                }
            }

            match err {
                Some(e) => error!(
                    topic = %topic,
                    key = %msg.key_str(),
                    message = %msg.value_str(),
                    error = %e,
                    "Message delivery failed"
                ),
                None => debug!(
                    topic = %topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    key = %msg.key_str(),
                    "Message delivered"
                ),
            }
        }
    })
}
