//! Core circuit breaker implementation with async support.

use crate::circuit_breaker::metrics::CIRCUIT_BREAKER_METRICS;
use crate::circuit_breaker::state::StateData;
use crate::circuit_breaker::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerResult, CircuitBreakerState, Counts,
    StateTransition,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A thread-safe, async circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<StateData>>,
}

/// Admission ticket for one call; carries the generation it was admitted in
struct Permit {
    generation: u64,
    probe: bool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(name = %name, config = ?config, "Creating circuit breaker");

        Self {
            name,
            config,
            state: Arc::new(RwLock::new(StateData::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, promoting Open to Half-Open once the open timeout has elapsed
    pub fn state(&self) -> CircuitBreakerState {
        let mut state = self.state.write();
        self.maybe_half_open(&mut state);
        state.state
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` through the breaker; every error counts as a failure
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
    {
        self.call_with_acceptable(f, |_| false).await
    }

    /// Run `f` through the breaker.
    ///
    /// Errors for which `acceptable` returns true are handed back to the caller but
    /// recorded as successes. When the circuit is open `f` is never invoked and the
    /// call fails with [`CircuitBreakerError::Open`] converted into `E`.
    pub async fn call_with_acceptable<F, Fut, T, E, A>(&self, f: F, acceptable: A) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<CircuitBreakerError>,
        A: Fn(&E) -> bool,
    {
        let permit = self.admit().map_err(E::from)?;

        let result = f().await;

        match &result {
            Ok(_) => self.on_success(permit, "success"),
            Err(err) if acceptable(err) => self.on_success(permit, "acceptable"),
            Err(_) => self.on_failure(permit),
        }

        result
    }

    fn admit(&self) -> CircuitBreakerResult<Permit> {
        let mut state = self.state.write();
        self.maybe_half_open(&mut state);

        match state.state {
            CircuitBreakerState::Closed => {
                state.record_request();
                Ok(Permit {
                    generation: state.transition_count,
                    probe: false,
                })
            }
            CircuitBreakerState::Open => {
                CIRCUIT_BREAKER_METRICS.record_call(&self.name, "rejected");
                Err(CircuitBreakerError::Open(self.name.clone()))
            }
            CircuitBreakerState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_max_requests {
                    CIRCUIT_BREAKER_METRICS.record_call(&self.name, "rejected");
                    return Err(CircuitBreakerError::Open(self.name.clone()));
                }
                state.half_open_in_flight += 1;
                state.record_request();
                Ok(Permit {
                    generation: state.transition_count,
                    probe: true,
                })
            }
        }
    }

    fn maybe_half_open(&self, state: &mut StateData) {
        if state.open_timeout_elapsed(self.config.open_timeout) {
            let transition = state.transition_to(CircuitBreakerState::HalfOpen);
            self.log_transition(&transition);
        }
    }

    fn on_success(&self, permit: Permit, outcome: &str) {
        CIRCUIT_BREAKER_METRICS.record_call(&self.name, outcome);

        let mut state = self.state.write();
        // Outcome of a call admitted before the last state change is ignored
        if permit.generation != state.transition_count {
            return;
        }
        if permit.probe {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
        state.record_success();

        if state.state == CircuitBreakerState::HalfOpen
            && state.counts.consecutive_successes >= self.config.success_threshold
        {
            let transition = state.transition_to(CircuitBreakerState::Closed);
            self.log_transition(&transition);
        }
    }

    fn on_failure(&self, permit: Permit) {
        CIRCUIT_BREAKER_METRICS.record_call(&self.name, "failure");

        let mut state = self.state.write();
        if permit.generation != state.transition_count {
            return;
        }
        if permit.probe {
            state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
        }
        state.record_failure();

        debug!(
            name = %self.name,
            state = %state.state,
            consecutive_failures = state.counts.consecutive_failures,
            "Protected call failed"
        );

        let trip = match state.state {
            CircuitBreakerState::Closed => {
                state.counts.consecutive_failures >= self.config.failure_threshold
            }
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Open => false,
        };
        if trip {
            let transition = state.transition_to(CircuitBreakerState::Open);
            self.log_transition(&transition);
        }
    }

    fn log_transition(&self, transition: &StateTransition) {
        if transition.to == CircuitBreakerState::Open {
            warn!(
                name = %self.name,
                from = %transition.from,
                reason = %transition.reason,
                "Circuit breaker opened"
            );
        } else {
            info!(
                name = %self.name,
                from = %transition.from,
                to = %transition.to,
                reason = %transition.reason,
                "Circuit breaker state transition"
            );
        }

        CIRCUIT_BREAKER_METRICS
            .state
            .with_label_values(&[&self.name])
            .set(transition.to.to_metric_value());

        CIRCUIT_BREAKER_METRICS
            .state_transitions
            .with_label_values(&[
                &self.name,
                &transition.from.to_string(),
                &transition.to.to_string(),
            ])
            .inc();
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.read();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            counts: state.counts,
            transition_count: state.transition_count,
        }
    }

    /// Manually reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut state = self.state.write();
        if state.state != CircuitBreakerState::Closed {
            let transition = state.transition_to(CircuitBreakerState::Closed);
            self.log_transition(&transition);
        }
    }

    /// Force the circuit breaker to open state
    pub fn force_open(&self) {
        let mut state = self.state.write();
        if state.state != CircuitBreakerState::Open {
            let transition = state.transition_to(CircuitBreakerState::Open);
            self.log_transition(&transition);
        }
    }
}

/// Snapshot of a circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitBreakerState,
    pub counts: Counts,
    pub transition_count: u64,
}
