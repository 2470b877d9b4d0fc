//! Configuration for the delay scheduler

use crate::error::{AppError, Result};
use std::time::Duration;

/// Delay scheduler settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayConfig {
    /// Key prefix; must not contain `{` or `}`
    pub prefix: String,

    /// Most members claimed from one bucket per tick
    pub batch_size: usize,

    /// Failed forwards are retried until an item has been attempted this many extra times
    pub max_retry_attempts: u32,

    /// Delay before a failed item becomes due again
    pub retry_delay: Duration,

    /// Items processed concurrently within one tick
    pub concurrency: usize,

    pub tick_interval: Duration,

    pub bucket_count: u32,

    /// Claimed items older than this are moved back to pending; `None` leaves them claimed
    pub visibility_timeout: Option<Duration>,
}

impl Default for DelayConfig {
    fn default() -> Self {
        Self {
            prefix: "kafka:delay:queue".to_string(),
            batch_size: 1000,
            max_retry_attempts: 2,
            retry_delay: Duration::from_secs(60),
            concurrency: 100,
            tick_interval: Duration::from_secs(1),
            bucket_count: 10,
            visibility_timeout: None,
        }
    }
}

impl DelayConfig {
    pub fn builder() -> DelayConfigBuilder {
        DelayConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefix.is_empty() || self.prefix.contains(['{', '}']) {
            return Err(AppError::Configuration(format!(
                "delay prefix '{}' must be non-empty and free of braces",
                self.prefix
            )));
        }
        if self.batch_size == 0 || self.concurrency == 0 || self.bucket_count == 0 {
            return Err(AppError::Configuration(
                "delay batch_size, concurrency and bucket_count must be greater than 0"
                    .to_string(),
            ));
        }
        if self.retry_delay.is_zero() || self.tick_interval.is_zero() {
            return Err(AppError::Configuration(
                "delay retry_delay and tick_interval must be greater than 0".to_string(),
            ));
        }
        if self.visibility_timeout.is_some_and(|t| t.is_zero()) {
            return Err(AppError::Configuration(
                "delay visibility_timeout must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for DelayConfig
#[derive(Default)]
pub struct DelayConfigBuilder {
    config: DelayConfig,
}

impl DelayConfigBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.config.tick_interval = interval;
        self
    }

    pub fn bucket_count(mut self, count: u32) -> Self {
        self.config.bucket_count = count;
        self
    }

    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.config.visibility_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> DelayConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = DelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bucket_count, 10);
        assert_eq!(config.max_retry_attempts, 2);
        assert!(config.visibility_timeout.is_none());
    }

    #[test]
    fn test_rejects_braced_prefix() {
        let config = DelayConfig::builder().prefix("{delay}").build();
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_builder() {
        let config = DelayConfig::builder()
            .batch_size(50)
            .concurrency(4)
            .visibility_timeout(Duration::from_secs(300))
            .build();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.visibility_timeout, Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());

        assert!(DelayConfig::builder().bucket_count(0).build().validate().is_err());
    }
}
