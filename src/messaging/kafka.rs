//! rdkafka-backed broker clients

use crate::messaging::broker::{BrokerReader, BrokerWriter};
use crate::messaging::config::{KafkaConnection, ReaderConfig, WriterConfig};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::message::{Header, Message};
use async_trait::async_trait;
use futures::future::join_all;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header as KafkaHeader, Headers, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Message as _, Offset, TopicPartitionList};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Base client settings shared by consumers and producers.
///
/// SASL credentials select `sasl_plaintext`, or `sasl_ssl` when a CA file is also set;
/// a CA file alone selects `ssl`. Broker hostname verification is disabled whenever TLS
/// is on, so brokers are trusted on the CA alone.
pub fn client_config(conn: &KafkaConnection) -> MessagingResult<ClientConfig> {
    conn.validate()?;

    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", conn.bootstrap_servers())
        .set("client.id", &conn.client_id);

    let tls = conn.ca_file.is_some();
    if let Some(ca) = &conn.ca_file {
        config
            .set("ssl.ca.location", ca.to_string_lossy())
            .set("ssl.endpoint.identification.algorithm", "none");
    }

    match (&conn.sasl, tls) {
        (Some(sasl), _) => {
            config
                .set("security.protocol", if tls { "sasl_ssl" } else { "sasl_plaintext" })
                .set("sasl.mechanism", "PLAIN")
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }
        (None, true) => {
            config.set("security.protocol", "ssl");
        }
        (None, false) => {
            config.set("security.protocol", "plaintext");
        }
    }

    Ok(config)
}

/// Consumer-group member for one topic
pub struct KafkaFetcher {
    consumer: StreamConsumer,
    topic: String,
    sync_commit: bool,
    closed: watch::Sender<bool>,
}

impl KafkaFetcher {
    pub fn new(
        conn: &KafkaConnection,
        topic: impl Into<String>,
        group: &str,
        config: &ReaderConfig,
    ) -> MessagingResult<Self> {
        let topic = topic.into();
        let sync_commit = config.commit_interval.is_zero();

        let consumer: StreamConsumer = client_config(conn)?
            .set("group.id", group)
            // Offsets are stored explicitly after each message is handled
            .set("enable.auto.offset.store", "false")
            .set("enable.auto.commit", (!sync_commit).to_string())
            .set(
                "auto.commit.interval.ms",
                config.commit_interval.as_millis().max(1).to_string(),
            )
            .set("auto.offset.reset", config.start_offset.as_str())
            .set("fetch.min.bytes", config.min_bytes.to_string())
            .set("fetch.max.bytes", config.max_bytes.to_string())
            .set("fetch.wait.max.ms", config.max_wait.as_millis().to_string())
            .set("queued.min.messages", config.queue_capacity.to_string())
            .set("session.timeout.ms", config.session_timeout.as_millis().to_string())
            .set(
                "heartbeat.interval.ms",
                config.heartbeat_interval.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                config.rebalance_timeout.as_millis().to_string(),
            )
            .set(
                "topic.metadata.refresh.interval.ms",
                config.partition_watch_interval.as_millis().to_string(),
            )
            .create()?;

        consumer.subscribe(&[topic.as_str()])?;

        info!(topic = %topic, group = %group, sync_commit, "Kafka consumer subscribed");

        let (closed, _) = watch::channel(false);
        Ok(Self {
            consumer,
            topic,
            sync_commit,
            closed,
        })
    }
}

fn to_message(msg: &BorrowedMessage<'_>) -> Message {
    let headers = msg
        .headers()
        .map(|hs| {
            hs.iter()
                .map(|h| Header {
                    key: h.key.to_string(),
                    value: h.value.map(<[u8]>::to_vec).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Message {
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
        key: msg.key().map(<[u8]>::to_vec).unwrap_or_default(),
        value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        headers,
    }
}

#[async_trait]
impl BrokerReader for KafkaFetcher {
    async fn fetch_message(&self) -> MessagingResult<Message> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(MessagingError::Closed);
        }

        tokio::select! {
            _ = async { let _ = closed.wait_for(|c| *c).await; } => Err(MessagingError::Closed),
            received = self.consumer.recv() => match received {
                Ok(msg) => Ok(to_message(&msg)),
                Err(e) => Err(e.into()),
            },
        }
    }

    async fn commit_messages(&self, messages: &[Message]) -> MessagingResult<()> {
        let mut tpl = TopicPartitionList::new();
        for msg in messages {
            tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(msg.offset + 1))?;
        }

        if self.sync_commit {
            self.consumer.commit(&tpl, CommitMode::Sync)?;
        } else {
            self.consumer.store_offsets(&tpl)?;
        }
        Ok(())
    }

    async fn close(&self) -> MessagingResult<()> {
        // Stops fetchers only; drained messages are committed before finalize unsubscribes
        if !self.closed.send_replace(true) {
            info!(topic = %self.topic, "Kafka consumer closing");
        }
        Ok(())
    }

    async fn finalize(&self) -> MessagingResult<()> {
        let committed = if self.sync_commit {
            Ok(())
        } else {
            // Push the last stored offsets before leaving the group
            match self.consumer.commit_consumer_state(CommitMode::Sync) {
                Ok(()) => Ok(()),
                Err(rdkafka::error::KafkaError::ConsumerCommit(
                    rdkafka::error::RDKafkaErrorCode::NoOffset,
                )) => Ok(()),
                Err(e) => Err(e.into()),
            }
        };

        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer closed");
        committed
    }
}

/// Producer shared by every writer
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    write_timeout: Duration,
}

impl KafkaSink {
    pub fn new(conn: &KafkaConnection, config: &WriterConfig) -> MessagingResult<Self> {
        config.validate()?;

        let producer: FutureProducer = client_config(conn)?
            .set("request.required.acks", config.required_acks.as_str())
            .set("compression.type", &config.compression)
            .set("message.timeout.ms", config.write_timeout.as_millis().to_string())
            .set(
                "message.send.max.retries",
                config.max_attempts.saturating_sub(1).to_string(),
            )
            .set(
                "allow.auto.create.topics",
                config.allow_auto_topic_creation.to_string(),
            )
            .create()?;

        Ok(Self {
            producer,
            write_timeout: config.write_timeout,
        })
    }
}

#[async_trait]
impl BrokerWriter for KafkaSink {
    async fn write_messages(&self, messages: &mut [Message]) -> MessagingResult<()> {
        let sends = messages.iter().map(|msg| {
            let headers = msg.headers.iter().fold(
                OwnedHeaders::new_with_capacity(msg.headers.len()),
                |acc, h| {
                    acc.insert(KafkaHeader {
                        key: &h.key,
                        value: Some(h.value.as_slice()),
                    })
                },
            );
            let mut record = FutureRecord::<[u8], [u8]>::to(&msg.topic)
                .payload(msg.value.as_slice())
                .headers(headers);
            if !msg.key.is_empty() {
                record = record.key(msg.key.as_slice());
            }
            self.producer.send(record, Timeout::After(self.write_timeout))
        });
        let results = join_all(sends).await;

        let mut first_err = None;
        for (msg, result) in messages.iter_mut().zip(results) {
            match result {
                Ok((partition, offset)) => {
                    msg.partition = partition;
                    msg.offset = offset;
                }
                Err((e, _)) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    async fn close(&self) -> MessagingResult<()> {
        let producer = self.producer.clone();
        let timeout = self.write_timeout;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| MessagingError::Publish(format!("flush task failed: {}", e)))?;

        if let Err(e) = flushed {
            warn!(error = %e, "Kafka producer flush incomplete");
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_security_protocol() {
        let plain = client_config(&KafkaConnection::new(vec!["k:9092".into()])).unwrap();
        assert_eq!(plain.get("security.protocol"), Some("plaintext"));
        assert_eq!(plain.get("bootstrap.servers"), Some("k:9092"));

        let sasl = client_config(
            &KafkaConnection::new(vec!["k:9092".into()]).with_sasl("user", "secret"),
        )
        .unwrap();
        assert_eq!(sasl.get("security.protocol"), Some("sasl_plaintext"));
        assert_eq!(sasl.get("sasl.mechanism"), Some("PLAIN"));

        let tls = client_config(
            &KafkaConnection::new(vec!["k:9092".into()])
                .with_sasl("user", "secret")
                .with_ca_file("/etc/kafka/ca.pem"),
        )
        .unwrap();
        assert_eq!(tls.get("security.protocol"), Some("sasl_ssl"));
        assert_eq!(tls.get("ssl.ca.location"), Some("/etc/kafka/ca.pem"));
    }

    #[test]
    fn test_client_config_requires_brokers() {
        assert!(matches!(
            client_config(&KafkaConnection::new(vec![])),
            Err(MessagingError::Configuration(_))
        ));
    }
}
