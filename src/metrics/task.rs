//! Task-level metrics sink.

use super::{TASKS_TOTAL, TASK_DURATION_SECONDS};
use std::time::Duration;

/// One processed unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSample {
    /// How long the task took (or, for latency sinks, how long the message travelled)
    pub duration: Duration,
    /// Whether the task was dropped or failed
    pub drop: bool,
}

impl TaskSample {
    pub fn new(duration: Duration, drop: bool) -> Self {
        Self { duration, drop }
    }
}

/// Destination for `(duration, dropped)` samples
pub trait MetricsSink: Send + Sync {
    /// Record a sample
    fn add(&self, sample: TaskSample);
}

/// Prometheus-backed sink identified by a name label
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    name: String,
}

impl TaskMetrics {
    /// Create a sink with the given name, e.g. `kafka.writer.orders`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl MetricsSink for TaskMetrics {
    fn add(&self, sample: TaskSample) {
        TASK_DURATION_SECONDS
            .with_label_values(&[&self.name])
            .observe(sample.duration.as_secs_f64());

        let status = if sample.drop { "drop" } else { "ok" };
        TASKS_TOTAL.with_label_values(&[&self.name, status]).inc();
    }
}
