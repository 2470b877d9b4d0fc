// Layered configuration and broker lookup

use mq_relay::circuit_breaker::CircuitBreakerConfig;
use mq_relay::config::{resolve_brokers, Config, ConfigProvider, Settings};
use mq_relay::delay::DelayConfig;
use mq_relay::messaging::{ReaderConfig, RequiredAcks, StartOffset, WriterConfig};
use mq_relay::{AppError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

/// Flat key/value provider; values are JSON
struct MapProvider(HashMap<&'static str, serde_json::Value>);

impl ConfigProvider for MapProvider {
    fn get(&self, key: &str) -> Result<String> {
        self.0
            .get(key)
            .map(|v| v.to_string())
            .ok_or_else(|| AppError::Configuration(format!("missing key {}", key)))
    }

    fn get_unmarshal<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .0
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::Configuration(format!("missing key {}", key)))?;
        Ok(serde_json::from_value(value)?)
    }
}

#[test]
fn test_file_values_override_defaults() {
    let settings = Settings::from_toml(
        r#"
        [delay]
        bucket_count = 4
        visibility_timeout_secs = 120

        [writer]
        required_acks = "all"
        async_mode = false
        slow_threshold_ms = 0

        [reader]
        start_offset = "earliest"
        consumers = 2

        [breaker]
        enabled = true
        failure_threshold = 3
        "#,
    )
    .unwrap();
    let config = settings.config().unwrap();

    let delay = DelayConfig::from(&config.delay);
    assert_eq!(delay.bucket_count, 4);
    assert_eq!(delay.visibility_timeout, Some(Duration::from_secs(120)));
    assert_eq!(delay.prefix, "kafka:delay:queue");

    let writer = WriterConfig::from(&config.writer);
    assert_eq!(writer.required_acks, RequiredAcks::All);
    assert!(!writer.async_mode);
    assert_eq!(writer.slow_threshold, None);
    assert_eq!(writer.batch_size, 100);

    let reader = ReaderConfig::from(&config.reader);
    assert_eq!(reader.start_offset, StartOffset::Earliest);
    assert_eq!(reader.consumers, 2);
    assert_eq!(reader.fetchers, 8);

    let breaker = config.breaker.to_config().unwrap();
    assert_eq!(breaker.failure_threshold, 3);
    assert_eq!(
        breaker.success_threshold,
        CircuitBreakerConfig::for_kafka_producer().success_threshold
    );
}

#[test]
fn test_invalid_value_is_configuration_error() {
    let settings = Settings::from_toml("[delay]\nbucket_count = \"many\"\n").unwrap();
    assert!(matches!(settings.config(), Err(AppError::Configuration(_))));
}

#[test]
fn test_provider_reads_keys() {
    let settings = Settings::from_toml("").unwrap();

    assert_eq!(settings.get("delay.prefix").unwrap(), "kafka:delay:queue");
    assert_eq!(settings.get_unmarshal::<u32>("delay.bucket_count").unwrap(), 10);
    assert_eq!(
        settings.get_unmarshal::<Vec<String>>("kafka.brokers").unwrap(),
        vec!["127.0.0.1:9092".to_string()]
    );
    assert!(settings.get("delay.missing").is_err());
}

#[test]
fn test_kafka_addr_takes_precedence() {
    let settings = Settings::from_toml("kafka_addr = [\"k1:9092\", \"k2:9092\"]\n").unwrap();
    assert_eq!(
        resolve_brokers(&settings).unwrap(),
        vec!["k1:9092".to_string(), "k2:9092".to_string()]
    );

    let config = settings.config().unwrap();
    assert_eq!(
        config.kafka_connection().unwrap().brokers,
        vec!["k1:9092".to_string(), "k2:9092".to_string()]
    );

    let settings = Settings::from_toml("").unwrap();
    assert_eq!(
        resolve_brokers(&settings).unwrap(),
        vec!["127.0.0.1:9092".to_string()]
    );
    assert_eq!(
        settings.config().unwrap().kafka_connection().unwrap().brokers,
        vec!["127.0.0.1:9092".to_string()]
    );
}

#[test]
fn test_connection_without_brokers_rejected() {
    let config = Settings::from_toml("[kafka]\nbrokers = [\" \"]\n")
        .unwrap()
        .config()
        .unwrap();
    assert!(matches!(
        config.kafka_connection(),
        Err(AppError::Configuration(_))
    ));
}

#[test]
fn test_missing_brokers_rejected() {
    let provider = MapProvider(HashMap::from([
        ("kafka_addr", serde_json::json!([" "])),
        ("kafka.brokers", serde_json::json!([])),
    ]));
    assert!(matches!(
        resolve_brokers(&provider),
        Err(AppError::Configuration(_))
    ));

    let provider = MapProvider(HashMap::from([(
        "kafka.brokers",
        serde_json::json!(["b1:9092"]),
    )]));
    assert_eq!(resolve_brokers(&provider).unwrap(), vec!["b1:9092".to_string()]);
}

#[test]
fn test_kafka_connection_from_settings() {
    let config = Settings::from_toml(
        r#"
        [kafka]
        brokers = ["b1:9093"]
        client_id = "billing"
        username = "svc"
        password = "secret"
        ca_file = "/etc/ssl/kafka-ca.pem"
        "#,
    )
    .unwrap()
    .config()
    .unwrap();

    let conn = config.kafka_connection().unwrap();
    assert_eq!(conn.brokers, vec!["b1:9093".to_string()]);
    assert_eq!(conn.client_id, "billing");
    assert_eq!(conn.sasl.as_ref().unwrap().username, "svc");
    assert!(conn.ca_file.is_some());
    assert!(conn.validate().is_ok());
}

#[test]
fn test_default_config_builds_valid_module_configs() {
    let config = Config::default();
    assert!(DelayConfig::from(&config.delay).validate().is_ok());
    assert!(WriterConfig::from(&config.writer).validate().is_ok());
    assert!(ReaderConfig::from(&config.reader).validate().is_ok());
    assert!(config.breaker.to_config().is_none());
}

// The only test in this binary that touches process environment
#[test]
fn test_load_layers_file_and_environment() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(file, "[delay]\nbucket_count = 7\n\n[writer]\nbatch_size = 50").unwrap();

    std::env::set_var("CONFIG_PATH", file.path());
    std::env::set_var("MQ_RELAY__WRITER__BATCH_SIZE", "5");
    std::env::set_var("MQ_RELAY__KAFKA_ADDR", "e1:9092,e2:9092");

    let settings = Settings::load().unwrap();
    let config = settings.config().unwrap();
    let loaded = Config::load().unwrap();

    std::env::remove_var("CONFIG_PATH");
    std::env::remove_var("MQ_RELAY__WRITER__BATCH_SIZE");
    std::env::remove_var("MQ_RELAY__KAFKA_ADDR");

    assert_eq!(config.delay.bucket_count, 7);
    assert_eq!(config.writer.batch_size, 5);
    assert_eq!(
        resolve_brokers(&settings).unwrap(),
        vec!["e1:9092".to_string(), "e2:9092".to_string()]
    );
    assert_eq!(
        loaded.kafka_connection().unwrap().brokers,
        vec!["e1:9092".to_string(), "e2:9092".to_string()]
    );
}
