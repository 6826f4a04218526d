//! Kafka transport for retry topics.
//!
//! - `KafkaRecordPublisher`: `FutureProducer` publishing to a concrete topic,
//!   with headers, key and an optional pinned partition.
//! - `KafkaRecordSource`: `StreamConsumer` with manual commits. Also the
//!   `PartitionController` the backoff manager pauses, resumes and seeks.
//! - `RetryTopicConsumerContext`: drops pending backoffs for revoked
//!   partitions so a rebalance never resumes a partition we no longer own.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::ClientContext;
use tracing::{debug, info, warn};

use super::{
    BusError, ConsumerRecord, Headers, PartitionController, ProducerRecord, PublishAck,
    RecordPublisher, Result, TopicPartition,
};
use crate::backoff::ConsumerBackoffManager;
use crate::config::KafkaConfig;
use crate::container::RecordSource;

/// How long `poll` waits for a record before reporting none.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for synchronous seek calls.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for producers and consumers.
#[derive(Clone, Debug)]
pub struct KafkaClientConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer group ID (required for consuming).
    pub group_id: Option<String>,
    /// Producer delivery timeout.
    pub message_timeout: Duration,
    pub sasl_username: Option<String>,
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    pub ssl_ca_location: Option<String>,
}

impl KafkaClientConfig {
    /// Config for publishing only.
    pub fn publisher(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            group_id: None,
            message_timeout: Duration::from_secs(5),
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Config for consuming as part of `group_id`.
    pub fn subscriber(bootstrap_servers: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            group_id: Some(group_id.into()),
            ..Self::publisher(bootstrap_servers)
        }
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = timeout;
        self
    }

    /// Build a ClientConfig for producers.
    pub(crate) fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set(
            "message.timeout.ms",
            self.message_timeout.as_millis().to_string(),
        );
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for consumers.
    pub(crate) fn build_consumer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("enable.auto.commit", "false");
        config.set("auto.offset.reset", "earliest");

        if let Some(ref group_id) = self.group_id {
            config.set("group.id", group_id);
        }

        self.apply_security_config(&mut config);
        config
    }

    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }
        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }
        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }
        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

impl From<&KafkaConfig> for KafkaClientConfig {
    fn from(config: &KafkaConfig) -> Self {
        Self {
            bootstrap_servers: config.bootstrap_servers.clone(),
            group_id: config.group_id.clone(),
            message_timeout: Duration::from_millis(config.message_timeout_ms),
            sasl_username: config.sasl_username.clone(),
            sasl_password: config.sasl_password.clone(),
            sasl_mechanism: config.sasl_mechanism.clone(),
            security_protocol: config.security_protocol.clone(),
            ssl_ca_location: config.ssl_ca_location.clone(),
        }
    }
}

fn to_kafka_headers(headers: &Headers) -> OwnedHeaders {
    headers
        .iter()
        .fold(OwnedHeaders::new_with_capacity(headers.len()), |acc, (key, value)| {
            acc.insert(Header {
                key,
                value: Some(value),
            })
        })
}

fn to_consumer_record(message: &BorrowedMessage<'_>) -> ConsumerRecord {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| (h.key.to_string(), h.value.map(<[u8]>::to_vec).unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    ConsumerRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        headers,
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message.timestamp().to_millis().unwrap_or_default(),
    }
}

/// Publishes retry and dead-letter records.
pub struct KafkaRecordPublisher {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaRecordPublisher {
    pub fn new(config: &KafkaClientConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            "Connected Kafka publisher"
        );

        Ok(Self {
            producer,
            timeout: config.message_timeout,
        })
    }
}

#[async_trait]
impl RecordPublisher for KafkaRecordPublisher {
    async fn publish(&self, record: ProducerRecord) -> Result<PublishAck> {
        let mut out: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&record.topic)
            .payload(record.payload.as_slice())
            .headers(to_kafka_headers(&record.headers));
        if let Some(key) = record.key.as_deref() {
            out = out.key(key);
        }
        if let Some(partition) = record.partition {
            out = out.partition(partition);
        }

        let (partition, offset) = self
            .producer
            .send(out, self.timeout)
            .await
            .map_err(|(e, _)| BusError::Publish(format!("Failed to publish to {}: {}", record.topic, e)))?;

        debug!(
            topic = %record.topic,
            partition,
            offset,
            "Published record to Kafka"
        );

        Ok(PublishAck {
            topic: record.topic,
            partition,
            offset,
        })
    }
}

/// Consumer context that keeps the backoff manager in step with rebalances.
pub struct RetryTopicConsumerContext {
    backoff: ConsumerBackoffManager,
}

impl RetryTopicConsumerContext {
    pub fn new(backoff: ConsumerBackoffManager) -> Self {
        Self { backoff }
    }
}

impl ClientContext for RetryTopicConsumerContext {}

impl ConsumerContext for RetryTopicConsumerContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let revoked: Vec<TopicPartition> = tpl
                .elements()
                .iter()
                .map(|e| TopicPartition::new(e.topic(), e.partition()))
                .collect();
            info!(partitions = ?revoked, "Partitions revoked");
            self.backoff.on_partitions_revoked(&revoked);
        }
    }
}

fn single_partition(tp: &TopicPartition) -> TopicPartitionList {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(&tp.topic, tp.partition);
    tpl
}

/// Consumer over every topic of a retry chain.
pub struct KafkaRecordSource {
    consumer: StreamConsumer<RetryTopicConsumerContext>,
    poll_timeout: Duration,
}

impl KafkaRecordSource {
    /// Create a consumer for `config.group_id` and subscribe to `topics`.
    pub fn new(config: &KafkaClientConfig, topics: &[String], backoff: ConsumerBackoffManager) -> Result<Self> {
        if config.group_id.is_none() {
            return Err(BusError::Consumer(
                "No group id configured. Use KafkaClientConfig::subscriber()".to_string(),
            ));
        }

        let consumer: StreamConsumer<RetryTopicConsumerContext> = config
            .build_consumer_config()
            .create_with_context(RetryTopicConsumerContext::new(backoff))
            .map_err(|e| BusError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BusError::Consumer(format!("Failed to subscribe to topics: {}", e)))?;

        info!(topics = ?topics, "Subscribed to Kafka topics");

        Ok(Self {
            consumer,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        })
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

#[async_trait]
impl RecordSource for KafkaRecordSource {
    async fn poll(&self) -> Result<Option<ConsumerRecord>> {
        match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => Ok(None),
            Ok(Ok(message)) => Ok(Some(to_consumer_record(&message))),
            Ok(Err(e)) => Err(BusError::Consumer(format!("Kafka receive failed: {}", e))),
        }
    }

    async fn commit(&self, record: &ConsumerRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| BusError::Consumer(format!("Invalid commit offset: {}", e)))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| BusError::Consumer(format!("Failed to commit offset: {}", e)))
    }
}

impl PartitionController for KafkaRecordSource {
    fn pause(&self, tp: &TopicPartition) -> Result<()> {
        self.consumer
            .pause(&single_partition(tp))
            .map_err(|e| BusError::Consumer(format!("Failed to pause {}: {}", tp, e)))
    }

    fn resume(&self, tp: &TopicPartition) -> Result<()> {
        self.consumer.resume(&single_partition(tp)).map_err(|e| {
            warn!(partition = %tp, error = %e, "Resume failed");
            BusError::Consumer(format!("Failed to resume {}: {}", tp, e))
        })
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.consumer
            .seek(&tp.topic, tp.partition, Offset::Offset(offset), SEEK_TIMEOUT)
            .map_err(|e| BusError::Consumer(format!("Failed to seek {} to {}: {}", tp, offset, e)))
    }
}

#[cfg(test)]
mod tests;
