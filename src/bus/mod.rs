//! Broker-facing types for retry-topic delivery.
//!
//! This module contains:
//! - Record types: `ConsumerRecord`, `ProducerRecord`, `TopicPartition`
//! - `RecordPublisher` trait: outbound publish to a concrete topic
//! - `PartitionController` trait: pause/resume/seek on the consuming side
//! - Implementations: in-memory broker, mock publisher, Kafka

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

pub mod headers;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod mock;

// Re-exports
pub use headers::Headers;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaClientConfig, KafkaRecordPublisher, KafkaRecordSource};
pub use memory::{InMemoryBroker, MemoryConsumer};
pub use mock::{ControllerCall, MockPublisher, RecordingController};

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Unknown topic partition: {0}")]
    UnknownPartition(String),

    #[error("Consumer operation failed: {0}")]
    Consumer(String),
}

impl BusError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Broker unavailability and timeouts are transient. Serialization and
    /// routing errors will fail the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::Connection(_) | BusError::Publish(_) | BusError::Timeout(_)
        )
    }
}

// ============================================================================
// Records
// ============================================================================

/// A single partition of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record delivered by the broker client runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub headers: Headers,
    pub payload: Vec<u8>,
    /// Broker timestamp in epoch milliseconds.
    pub timestamp: i64,
}

impl ConsumerRecord {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }

    /// Hex-encoded key for log fields.
    pub fn key_hex(&self) -> Option<String> {
        self.key.as_deref().map(hex::encode)
    }
}

/// A record to be published.
///
/// `partition` pins the destination partition; `None` leaves the choice to
/// the broker's key-based partitioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub headers: Headers,
    pub payload: Vec<u8>,
}

impl ProducerRecord {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            headers: Headers::new(),
            payload: payload.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Broker acknowledgement of a published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

// ============================================================================
// Traits
// ============================================================================

/// Outbound publishing to a concrete topic.
///
/// Implementations:
/// - `InMemoryBroker`: partitioned in-process log
/// - `MockPublisher`: records publishes, injects failures
/// - `KafkaRecordPublisher`: rdkafka `FutureProducer`
#[async_trait]
pub trait RecordPublisher: Send + Sync {
    /// Publish a record, resolving once the broker acknowledges it.
    async fn publish(&self, record: ProducerRecord) -> Result<PublishAck>;
}

/// Per-partition fetch control exposed by the consumer runtime.
///
/// Pausing stops fetching without leaving the consumer group. `seek` moves
/// the fetch position so the next delivery on that partition is `offset`.
pub trait PartitionController: Send + Sync {
    fn pause(&self, tp: &TopicPartition) -> Result<()>;

    fn resume(&self, tp: &TopicPartition) -> Result<()>;

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<()>;
}
