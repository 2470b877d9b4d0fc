//! Prometheus metrics for the relay.
//!
//! Every component reports `(duration, dropped)` samples through a [`MetricsSink`].
//! The default sink, [`TaskMetrics`], records them into two global collectors
//! labelled by sink name:
//!
//! - `mq_relay_task_duration_seconds{name}`
//! - `mq_relay_tasks_total{name, status}` where status is `ok` or `drop`
//!
//! # Example
//! ```no_run
//! use mq_relay::metrics::{MetricsSink, TaskMetrics, TaskSample};
//! use std::time::Duration;
//!
//! let sink = TaskMetrics::new("kafka.delay");
//! sink.add(TaskSample::new(Duration::from_millis(12), false));
//! ```

mod task;

pub use task::{MetricsSink, TaskMetrics, TaskSample};

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry for all metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Duration of processed tasks in seconds
    ///
    /// Labels: name
    pub static ref TASK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "task_duration_seconds",
            "Duration of processed tasks in seconds"
        )
        .namespace("mq_relay")
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["name"]
    ).expect("Failed to create TASK_DURATION_SECONDS metric");

    /// Total number of processed tasks
    ///
    /// Labels: name, status (ok, drop)
    pub static ref TASKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("tasks_total", "Total number of processed tasks")
            .namespace("mq_relay"),
        &["name", "status"]
    ).expect("Failed to create TASKS_TOTAL metric");
}

/// Register all collectors with the global registry.
///
/// Calling this more than once returns an `AlreadyReg` error from prometheus.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    PROMETHEUS_REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()))?;
    PROMETHEUS_REGISTRY.register(Box::new(TASKS_TOTAL.clone()))?;
    crate::circuit_breaker::init_circuit_breaker_metrics(&PROMETHEUS_REGISTRY)?;

    tracing::info!("Metrics initialized");
    Ok(())
}

/// Render the registry in Prometheus text exposition format
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_sink_appears_in_exposition() {
        // Global registry: a second registration in the same process is AlreadyReg
        match init_metrics() {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => panic!("metrics registration failed: {}", e),
        }

        TaskMetrics::new("metrics.test.exposition")
            .add(TaskSample::new(std::time::Duration::from_millis(3), false));

        let text = gather_text();
        assert!(text.contains("mq_relay_tasks_total"));
        assert!(text.contains("mq_relay_task_duration_seconds"));
        assert!(text.contains("metrics.test.exposition"));
    }

    #[test]
    fn test_task_counter() {
        TASKS_TOTAL
            .with_label_values(&["metrics.test", "ok"])
            .inc();

        let value = TASKS_TOTAL
            .with_label_values(&["metrics.test", "ok"])
            .get();
        assert!(value >= 1.0);
    }
}
