//! Breaker state machine and call counters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// The current state of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitBreakerState {
    /// Numeric value for the Prometheus state gauge
    pub fn to_metric_value(&self) -> f64 {
        match self {
            CircuitBreakerState::Closed => 0.0,
            CircuitBreakerState::Open => 1.0,
            CircuitBreakerState::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerState::Closed => write!(f, "closed"),
            CircuitBreakerState::Open => write!(f, "open"),
            CircuitBreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A state change, returned so the caller can log and record it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
    pub reason: String,
}

/// Call counters for the current generation.
///
/// A generation starts at every state change; counters reset with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StateData {
    pub state: CircuitBreakerState,
    pub counts: Counts,
    pub opened_at: Option<Instant>,
    pub half_open_in_flight: u32,
    pub transition_count: u64,
}

impl StateData {
    pub fn new() -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            counts: Counts::default(),
            opened_at: None,
            half_open_in_flight: 0,
            transition_count: 0,
        }
    }

    pub fn record_request(&mut self) {
        self.counts.on_request();
    }

    pub fn record_success(&mut self) {
        self.counts.on_success();
    }

    pub fn record_failure(&mut self) {
        self.counts.on_failure();
    }

    pub fn transition_to(&mut self, to: CircuitBreakerState) -> StateTransition {
        let transition = StateTransition {
            from: self.state,
            to,
            reason: self.transition_reason(to),
        };

        self.state = to;
        self.counts = Counts::default();
        self.half_open_in_flight = 0;
        self.transition_count += 1;
        self.opened_at = match to {
            CircuitBreakerState::Open => Some(Instant::now()),
            _ => None,
        };

        transition
    }

    fn transition_reason(&self, to: CircuitBreakerState) -> String {
        match (self.state, to) {
            (CircuitBreakerState::Closed, CircuitBreakerState::Open) => format!(
                "{} consecutive failures",
                self.counts.consecutive_failures
            ),
            (CircuitBreakerState::Open, CircuitBreakerState::HalfOpen) => {
                "open timeout elapsed".to_string()
            }
            (CircuitBreakerState::HalfOpen, CircuitBreakerState::Closed) => format!(
                "{} consecutive probe successes",
                self.counts.consecutive_successes
            ),
            (CircuitBreakerState::HalfOpen, CircuitBreakerState::Open) => {
                "probe failed".to_string()
            }
            (from, to) => format!("manual {} -> {}", from, to),
        }
    }

    pub fn open_timeout_elapsed(&self, timeout: Duration) -> bool {
        match (self.state, self.opened_at) {
            (CircuitBreakerState::Open, Some(opened_at)) => opened_at.elapsed() >= timeout,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_track_consecutive_runs() {
        let mut data = StateData::new();
        data.record_failure();
        data.record_failure();
        assert_eq!(data.counts.consecutive_failures, 2);

        data.record_success();
        assert_eq!(data.counts.consecutive_failures, 0);
        assert_eq!(data.counts.consecutive_successes, 1);
        assert_eq!(data.counts.total_failures, 2);
    }

    #[test]
    fn test_transition_resets_generation() {
        let mut data = StateData::new();
        data.record_request();
        data.record_failure();

        let transition = data.transition_to(CircuitBreakerState::Open);
        assert_eq!(transition.from, CircuitBreakerState::Closed);
        assert_eq!(transition.to, CircuitBreakerState::Open);
        assert_eq!(transition.reason, "1 consecutive failures");
        assert_eq!(data.counts, Counts::default());
        assert!(data.opened_at.is_some());

        data.transition_to(CircuitBreakerState::Closed);
        assert!(data.opened_at.is_none());
        assert_eq!(data.transition_count, 2);
    }

    #[test]
    fn test_open_timeout_elapsed() {
        let mut data = StateData::new();
        assert!(!data.open_timeout_elapsed(Duration::ZERO));

        data.transition_to(CircuitBreakerState::Open);
        assert!(!data.open_timeout_elapsed(Duration::from_secs(60)));
        assert!(data.open_timeout_elapsed(Duration::ZERO));
    }
}
