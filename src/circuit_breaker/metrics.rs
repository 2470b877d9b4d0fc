//! Prometheus metrics for circuit breakers.

use lazy_static::lazy_static;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

/// Container for all circuit breaker metrics
pub struct CircuitBreakerMetrics {
    /// Current state (0=closed, 1=open, 2=half-open)
    pub state: GaugeVec,

    /// Calls by outcome: success, failure, acceptable, rejected
    pub calls_total: CounterVec,

    /// State transition events
    pub state_transitions: CounterVec,
}

impl CircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            state: GaugeVec::new(
                Opts::new("circuit_breaker_state", "Current state of circuit breakers")
                    .namespace("mq_relay"),
                &["name"],
            )
            .expect("Failed to create circuit_breaker_state metric"),

            calls_total: CounterVec::new(
                Opts::new(
                    "circuit_breaker_calls_total",
                    "Total number of calls through circuit breakers",
                )
                .namespace("mq_relay"),
                &["name", "outcome"],
            )
            .expect("Failed to create circuit_breaker_calls_total metric"),

            state_transitions: CounterVec::new(
                Opts::new(
                    "circuit_breaker_state_transitions_total",
                    "Total number of state transitions",
                )
                .namespace("mq_relay"),
                &["name", "from_state", "to_state"],
            )
            .expect("Failed to create circuit_breaker_state_transitions_total metric"),
        }
    }

    pub(crate) fn record_call(&self, name: &str, outcome: &str) {
        self.calls_total.with_label_values(&[name, outcome]).inc();
    }
}

lazy_static! {
    /// Global circuit breaker metrics instance
    pub static ref CIRCUIT_BREAKER_METRICS: CircuitBreakerMetrics = CircuitBreakerMetrics::new();
}

/// Register circuit breaker metrics with the Prometheus registry
pub fn init_circuit_breaker_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(CIRCUIT_BREAKER_METRICS.state.clone()))?;
    registry.register(Box::new(CIRCUIT_BREAKER_METRICS.calls_total.clone()))?;
    registry.register(Box::new(CIRCUIT_BREAKER_METRICS.state_transitions.clone()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_call() {
        CIRCUIT_BREAKER_METRICS.record_call("cb.metrics.test", "rejected");

        let value = CIRCUIT_BREAKER_METRICS
            .calls_total
            .with_label_values(&["cb.metrics.test", "rejected"])
            .get();
        assert!(value >= 1.0);
    }
}
