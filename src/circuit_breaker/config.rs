//! Circuit breaker configuration with builder pattern.

use crate::circuit_breaker::CircuitBreakerError;
use std::time::Duration;

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) before opening
    pub failure_threshold: u32,

    /// Consecutive probe successes (while half-open) before closing
    pub success_threshold: u32,

    /// How long the circuit stays open before allowing probes
    pub open_timeout: Duration,

    /// Concurrent probe calls allowed while half-open
    pub half_open_max_requests: u32,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.success_threshold == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.open_timeout.is_zero() {
            return Err(CircuitBreakerError::InvalidConfig(
                "open_timeout must be greater than 0".to_string(),
            ));
        }

        if self.half_open_max_requests == 0 {
            return Err(CircuitBreakerError::InvalidConfig(
                "half_open_max_requests must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Producer-side breaker: trips quickly on broker outages and probes every 10s
    pub fn for_kafka_producer() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(10),
            half_open_max_requests: 1,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(60),
            half_open_max_requests: 3,
        }
    }
}

/// Builder for CircuitBreakerConfig with fluent API
#[derive(Debug, Clone, Default)]
pub struct CircuitBreakerConfigBuilder {
    failure_threshold: Option<u32>,
    success_threshold: Option<u32>,
    open_timeout: Option<Duration>,
    half_open_max_requests: Option<u32>,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    pub fn open_timeout(mut self, duration: Duration) -> Self {
        self.open_timeout = Some(duration);
        self
    }

    pub fn half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = Some(max);
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        let default = CircuitBreakerConfig::default();

        let config = CircuitBreakerConfig {
            failure_threshold: self.failure_threshold.unwrap_or(default.failure_threshold),
            success_threshold: self.success_threshold.unwrap_or(default.success_threshold),
            open_timeout: self.open_timeout.unwrap_or(default.open_timeout),
            half_open_max_requests: self
                .half_open_max_requests
                .unwrap_or(default.half_open_max_requests),
        };

        config.validate()?;
        Ok(config)
    }
}
