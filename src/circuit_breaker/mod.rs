//! Circuit breaker guarding broker writes.
//!
//! # Circuit Breaker States
//!
//! - **Closed**: calls pass through, consecutive failures are counted
//! - **Open**: calls are rejected immediately until the open timeout elapses
//! - **Half-Open**: a limited number of probe calls decide whether to close again
//!
//! Callers classify errors through [`CircuitBreaker::call_with_acceptable`]: an error the
//! classifier accepts is returned to the caller but counted as a success, so only
//! infrastructure failures (network, broker unavailable) move the breaker towards open.
//!
//! # Example
//!
//! ```no_run
//! use mq_relay::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use mq_relay::messaging::MessagingError;
//!
//! # async fn run() -> Result<(), MessagingError> {
//! let breaker = CircuitBreaker::new("kafka.writer.orders", CircuitBreakerConfig::for_kafka_producer());
//!
//! let value = breaker
//!     .call_with_acceptable(|| async { Ok::<_, MessagingError>(42) }, |e| !e.is_network())
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod core;
mod metrics;
mod state;

pub use config::{CircuitBreakerConfig, CircuitBreakerConfigBuilder};
pub use core::{CircuitBreaker, CircuitBreakerStats};
pub use metrics::{init_circuit_breaker_metrics, CIRCUIT_BREAKER_METRICS};
pub use state::{CircuitBreakerState, Counts, StateTransition};

use crate::error::AppError;

/// Result type for circuit breaker operations
pub type CircuitBreakerResult<T> = std::result::Result<T, CircuitBreakerError>;

/// Errors raised by the breaker itself
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CircuitBreakerError {
    /// Circuit is open (or half-open and saturated) and rejecting calls
    #[error("Circuit breaker is open for '{0}'")]
    Open(String),

    /// Configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open(name) => {
                AppError::Messaging(format!("Circuit breaker open: {}", name))
            }
            CircuitBreakerError::InvalidConfig(msg) => AppError::Configuration(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_error_conversion() {
        let err = CircuitBreakerError::Open("kafka.writer.t1".to_string());
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Messaging(_)));

        let err = CircuitBreakerError::InvalidConfig("bad".to_string());
        let app_err: AppError = err.into();
        assert!(matches!(app_err, AppError::Configuration(_)));
    }
}
