//! Writer, reader and broker connection settings

use crate::messaging::error::{MessagingError, MessagingResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// SASL PLAIN credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaslConfig {
    pub username: String,
    pub password: String,
}

/// How to reach the broker cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConnection {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub sasl: Option<SaslConfig>,
    /// CA bundle used to verify the brokers; enables TLS when set
    pub ca_file: Option<PathBuf>,
}

impl KafkaConnection {
    pub fn new(brokers: Vec<String>) -> Self {
        Self {
            brokers,
            client_id: "mq-relay".to_string(),
            sasl: None,
            ca_file: None,
        }
    }

    pub fn with_sasl(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.sasl = Some(SaslConfig {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn validate(&self) -> MessagingResult<()> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(MessagingError::Configuration(
                "at least one broker address is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bootstrap_servers(&self) -> String {
        self.brokers
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Producer acknowledgement level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RequiredAcks {
    /// Fire and forget
    #[serde(rename = "0")]
    None,
    /// Leader only
    #[default]
    #[serde(rename = "1")]
    One,
    /// All in-sync replicas
    #[serde(rename = "all")]
    All,
}

impl RequiredAcks {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequiredAcks::None => "0",
            RequiredAcks::One => "1",
            RequiredAcks::All => "all",
        }
    }
}

/// Batched writer settings
#[derive(Debug, Clone, PartialEq)]
pub struct WriterConfig {
    /// Flush once this many messages are buffered
    pub batch_size: usize,
    /// Flush once the buffered key+value+header bytes reach this size
    pub batch_bytes: usize,
    /// Flush a non-empty batch this long after its first message arrived
    pub batch_timeout: Duration,
    /// Return from `push` once buffered instead of once delivered
    pub async_mode: bool,
    pub required_acks: RequiredAcks,
    /// none, gzip, snappy, lz4 or zstd
    pub compression: String,
    pub write_timeout: Duration,
    pub max_attempts: u32,
    /// Capacity of the channel between `push` callers and the batcher
    pub queue_capacity: usize,
    pub allow_auto_topic_creation: bool,
    /// Delivery latency above which a slow-log line is written; `None` disables it
    pub slow_threshold: Option<Duration>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_bytes: 1024 * 1024,
            batch_timeout: Duration::from_secs(1),
            async_mode: true,
            required_acks: RequiredAcks::One,
            compression: "snappy".to_string(),
            write_timeout: Duration::from_secs(10),
            max_attempts: 10,
            queue_capacity: 1000,
            allow_auto_topic_creation: false,
            slow_threshold: Some(Duration::from_secs(2)),
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> MessagingResult<()> {
        if self.batch_size == 0 {
            return Err(MessagingError::Configuration(
                "writer batch_size must be greater than 0".to_string(),
            ));
        }
        if self.batch_bytes == 0 {
            return Err(MessagingError::Configuration(
                "writer batch_bytes must be greater than 0".to_string(),
            ));
        }
        if self.batch_timeout.is_zero() {
            return Err(MessagingError::Configuration(
                "writer batch_timeout must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(MessagingError::Configuration(
                "writer queue_capacity must be greater than 0".to_string(),
            ));
        }
        match self.compression.as_str() {
            "none" | "gzip" | "snappy" | "lz4" | "zstd" => Ok(()),
            other => Err(MessagingError::Configuration(format!(
                "unsupported compression '{}'",
                other
            ))),
        }
    }
}

/// Where a new consumer group starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartOffset {
    Earliest,
    #[default]
    Latest,
}

impl StartOffset {
    pub fn as_str(&self) -> &'static str {
        match self {
            StartOffset::Earliest => "earliest",
            StartOffset::Latest => "latest",
        }
    }
}

/// Consumer pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderConfig {
    /// Routines pulling from the broker
    pub fetchers: usize,
    /// Routines running the handler
    pub consumers: usize,
    /// Buffer between fetchers and consumers
    pub channel_capacity: usize,
    pub start_offset: StartOffset,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_wait: Duration,
    /// Zero commits synchronously after every message
    pub commit_interval: Duration,
    pub queue_capacity: usize,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub rebalance_timeout: Duration,
    pub partition_watch_interval: Duration,
    /// Flow latency above which a slow-log line is written; `None` disables it
    pub slow_threshold: Option<Duration>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            fetchers: 8,
            consumers: 8,
            channel_capacity: 1,
            start_offset: StartOffset::Latest,
            min_bytes: 128,
            max_bytes: 4 * 1024 * 1024,
            max_wait: Duration::from_millis(100),
            commit_interval: Duration::from_millis(400),
            queue_capacity: 1000,
            session_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(3),
            rebalance_timeout: Duration::from_secs(30),
            partition_watch_interval: Duration::from_secs(5),
            slow_threshold: Some(Duration::from_secs(3)),
        }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> MessagingResult<()> {
        if self.fetchers == 0 || self.consumers == 0 {
            return Err(MessagingError::Configuration(
                "reader fetchers and consumers must be greater than 0".to_string(),
            ));
        }
        if self.min_bytes > self.max_bytes {
            return Err(MessagingError::Configuration(format!(
                "reader min_bytes ({}) exceeds max_bytes ({})",
                self.min_bytes, self.max_bytes
            )));
        }
        if self.heartbeat_interval >= self.session_timeout {
            return Err(MessagingError::Configuration(
                "reader heartbeat_interval must be shorter than session_timeout".to_string(),
            ));
        }
        Ok(())
    }
}
