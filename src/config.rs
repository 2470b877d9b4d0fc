use crate::circuit_breaker::CircuitBreakerConfig;
use crate::delay::DelayConfig;
use crate::error::{AppError, Result};
use crate::messaging::{KafkaConnection, ReaderConfig, RequiredAcks, StartOffset, WriterConfig};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker list taking precedence over `kafka.brokers`
    #[serde(default)]
    pub kafka_addr: Vec<String>,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub kafka: KafkaSettings,

    #[serde(default)]
    pub delay: DelaySettings,

    #[serde(default)]
    pub writer: WriterSettings,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub reader: ReaderSettings,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        Settings::load()?.config()
    }

    /// Brokers from `kafka_addr`, falling back to `kafka.brokers`
    pub fn brokers(&self) -> Result<Vec<String>> {
        clean_brokers(self.kafka_addr.clone())
            .or_else(|| clean_brokers(self.kafka.brokers.clone()))
            .ok_or_else(no_brokers)
    }

    /// Broker connection from `kafka_addr` and the `[kafka]` section
    pub fn kafka_connection(&self) -> Result<KafkaConnection> {
        let mut conn = KafkaConnection::new(self.brokers()?);
        conn.client_id = self.kafka.client_id.clone();
        if let (Some(username), Some(password)) = (&self.kafka.username, &self.kafka.password) {
            conn = conn.with_sasl(username.clone(), password.clone());
        }
        if let Some(ca) = &self.kafka.ca_file {
            conn = conn.with_ca_file(ca.clone());
        }
        Ok(conn)
    }
}

/// Layered configuration source.
///
/// Built from the embedded defaults, then the optional file named by `CONFIG_PATH`,
/// then `MQ_RELAY__SECTION__KEY` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    inner: config::Config,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/local.toml".to_string());

        let inner = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: MQ_RELAY__)
            .add_source(
                config::Environment::with_prefix("MQ_RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers")
                    .with_list_parse_key("kafka_addr")
                    .try_parsing(true),
            )
            .build()?;

        Ok(Self { inner })
    }

    /// Defaults overlaid with a TOML document
    pub fn from_toml(toml: &str) -> Result<Self> {
        let inner = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        Ok(Self { inner })
    }

    pub fn config(&self) -> Result<Config> {
        Ok(self.inner.clone().try_deserialize()?)
    }
}

/// Key/value view of the configuration
pub trait ConfigProvider {
    /// Value at `key` as a string
    fn get(&self, key: &str) -> Result<String>;

    /// Value at `key` deserialized into `T`
    fn get_unmarshal<T: DeserializeOwned>(&self, key: &str) -> Result<T>;
}

impl ConfigProvider for Settings {
    fn get(&self, key: &str) -> Result<String> {
        Ok(self.inner.get_string(key)?)
    }

    fn get_unmarshal<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(self.inner.get::<T>(key)?)
    }
}

/// Broker list from `kafka_addr`, falling back to `kafka.brokers`
pub fn resolve_brokers<P: ConfigProvider>(provider: &P) -> Result<Vec<String>> {
    provider
        .get_unmarshal::<Vec<String>>("kafka_addr")
        .ok()
        .and_then(clean_brokers)
        .or_else(|| {
            provider
                .get_unmarshal::<Vec<String>>("kafka.brokers")
                .ok()
                .and_then(clean_brokers)
        })
        .ok_or_else(no_brokers)
}

fn clean_brokers(brokers: Vec<String>) -> Option<Vec<String>> {
    let brokers: Vec<String> = brokers
        .into_iter()
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
        .collect();
    (!brokers.is_empty()).then_some(brokers)
}

fn no_brokers() -> AppError {
    AppError::Configuration("no Kafka brokers configured; set kafka_addr or kafka.brokers".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            prometheus_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSettings {
    #[serde(default)]
    pub brokers: Vec<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// SASL PLAIN user; SASL is enabled when both user and password are set
    pub username: Option<String>,

    pub password: Option<String>,

    /// CA bundle; enables TLS
    pub ca_file: Option<PathBuf>,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            client_id: default_client_id(),
            username: None,
            password: None,
            ca_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub prefix: String,
    pub batch_size: usize,
    pub max_retry_attempts: u32,
    pub retry_delay_secs: u64,
    pub concurrency: usize,
    pub tick_interval_ms: u64,
    pub bucket_count: u32,
    /// 0 disables requeueing of expired claims
    pub visibility_timeout_secs: u64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        let d = DelayConfig::default();
        Self {
            prefix: d.prefix,
            batch_size: d.batch_size,
            max_retry_attempts: d.max_retry_attempts,
            retry_delay_secs: d.retry_delay.as_secs(),
            concurrency: d.concurrency,
            tick_interval_ms: d.tick_interval.as_millis() as u64,
            bucket_count: d.bucket_count,
            visibility_timeout_secs: 0,
        }
    }
}

impl From<&DelaySettings> for DelayConfig {
    fn from(s: &DelaySettings) -> Self {
        DelayConfig {
            prefix: s.prefix.clone(),
            batch_size: s.batch_size,
            max_retry_attempts: s.max_retry_attempts,
            retry_delay: Duration::from_secs(s.retry_delay_secs),
            concurrency: s.concurrency,
            tick_interval: Duration::from_millis(s.tick_interval_ms),
            bucket_count: s.bucket_count,
            visibility_timeout: (s.visibility_timeout_secs > 0)
                .then(|| Duration::from_secs(s.visibility_timeout_secs)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterSettings {
    pub batch_size: usize,
    pub batch_bytes: usize,
    pub batch_timeout_ms: u64,
    pub async_mode: bool,
    pub required_acks: RequiredAcks,
    pub compression: String,
    pub write_timeout_ms: u64,
    pub max_attempts: u32,
    pub queue_capacity: usize,
    #[serde(default)]
    pub allow_auto_topic_creation: bool,
    /// 0 disables the slow log
    pub slow_threshold_ms: u64,
}

impl Default for WriterSettings {
    fn default() -> Self {
        let d = WriterConfig::default();
        Self {
            batch_size: d.batch_size,
            batch_bytes: d.batch_bytes,
            batch_timeout_ms: d.batch_timeout.as_millis() as u64,
            async_mode: d.async_mode,
            required_acks: d.required_acks,
            compression: d.compression,
            write_timeout_ms: d.write_timeout.as_millis() as u64,
            max_attempts: d.max_attempts,
            queue_capacity: d.queue_capacity,
            allow_auto_topic_creation: d.allow_auto_topic_creation,
            slow_threshold_ms: 2000,
        }
    }
}

impl From<&WriterSettings> for WriterConfig {
    fn from(s: &WriterSettings) -> Self {
        WriterConfig {
            batch_size: s.batch_size,
            batch_bytes: s.batch_bytes,
            batch_timeout: Duration::from_millis(s.batch_timeout_ms),
            async_mode: s.async_mode,
            required_acks: s.required_acks,
            compression: s.compression.clone(),
            write_timeout: Duration::from_millis(s.write_timeout_ms),
            max_attempts: s.max_attempts,
            queue_capacity: s.queue_capacity,
            allow_auto_topic_creation: s.allow_auto_topic_creation,
            slow_threshold: millis_threshold(s.slow_threshold_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    #[serde(default)]
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
    pub half_open_max_requests: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let d = CircuitBreakerConfig::for_kafka_producer();
        Self {
            enabled: false,
            failure_threshold: d.failure_threshold,
            success_threshold: d.success_threshold,
            open_timeout_secs: d.open_timeout.as_secs(),
            half_open_max_requests: d.half_open_max_requests,
        }
    }
}

impl BreakerSettings {
    /// Breaker configuration when enabled
    pub fn to_config(&self) -> Option<CircuitBreakerConfig> {
        self.enabled.then(|| CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            half_open_max_requests: self.half_open_max_requests,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderSettings {
    pub fetchers: usize,
    pub consumers: usize,
    pub channel_capacity: usize,
    pub start_offset: StartOffset,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_wait_ms: u64,
    /// 0 commits synchronously after every message
    pub commit_interval_ms: u64,
    pub queue_capacity: usize,
    pub session_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub rebalance_timeout_ms: u64,
    pub partition_watch_interval_ms: u64,
    /// 0 disables the slow log
    pub slow_threshold_ms: u64,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        let d = ReaderConfig::default();
        Self {
            fetchers: d.fetchers,
            consumers: d.consumers,
            channel_capacity: d.channel_capacity,
            start_offset: d.start_offset,
            min_bytes: d.min_bytes,
            max_bytes: d.max_bytes,
            max_wait_ms: d.max_wait.as_millis() as u64,
            commit_interval_ms: d.commit_interval.as_millis() as u64,
            queue_capacity: d.queue_capacity,
            session_timeout_ms: d.session_timeout.as_millis() as u64,
            heartbeat_interval_ms: d.heartbeat_interval.as_millis() as u64,
            rebalance_timeout_ms: d.rebalance_timeout.as_millis() as u64,
            partition_watch_interval_ms: d.partition_watch_interval.as_millis() as u64,
            slow_threshold_ms: 3000,
        }
    }
}

impl From<&ReaderSettings> for ReaderConfig {
    fn from(s: &ReaderSettings) -> Self {
        ReaderConfig {
            fetchers: s.fetchers,
            consumers: s.consumers,
            channel_capacity: s.channel_capacity,
            start_offset: s.start_offset,
            min_bytes: s.min_bytes,
            max_bytes: s.max_bytes,
            max_wait: Duration::from_millis(s.max_wait_ms),
            commit_interval: Duration::from_millis(s.commit_interval_ms),
            queue_capacity: s.queue_capacity,
            session_timeout: Duration::from_millis(s.session_timeout_ms),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            rebalance_timeout: Duration::from_millis(s.rebalance_timeout_ms),
            partition_watch_interval: Duration::from_millis(s.partition_watch_interval_ms),
            slow_threshold: millis_threshold(s.slow_threshold_ms),
        }
    }
}

fn millis_threshold(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "mq-relay".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_client_id() -> String {
    "mq-relay".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_module_defaults() {
        let config = Settings::from_toml("").unwrap().config().unwrap();

        assert_eq!(DelayConfig::from(&config.delay), DelayConfig::default());
        assert_eq!(WriterConfig::from(&config.writer), WriterConfig::default());
        assert_eq!(ReaderConfig::from(&config.reader), ReaderConfig::default());
        assert!(config.breaker.to_config().is_none());
    }

    #[test]
    fn test_zero_thresholds_disable() {
        let settings = DelaySettings {
            visibility_timeout_secs: 0,
            ..Default::default()
        };
        assert!(DelayConfig::from(&settings).visibility_timeout.is_none());

        let writer = WriterSettings {
            slow_threshold_ms: 0,
            ..Default::default()
        };
        assert!(WriterConfig::from(&writer).slow_threshold.is_none());
    }

    #[test]
    fn test_brokers_prefer_kafka_addr() {
        let mut config = Config::default();
        assert!(matches!(config.brokers(), Err(AppError::Configuration(_))));

        config.kafka.brokers = vec!["b1:9092".to_string()];
        assert_eq!(config.brokers().unwrap(), vec!["b1:9092".to_string()]);

        config.kafka_addr = vec![" a1:9092 ".to_string(), "".to_string()];
        assert_eq!(config.brokers().unwrap(), vec!["a1:9092".to_string()]);
    }
}
