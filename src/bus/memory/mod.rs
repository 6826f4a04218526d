//! In-memory partitioned broker for standalone mode and tests.
//!
//! Keeps an append-only log per topic partition. Keyed records are routed by
//! a stable hash of the key so same-key records share a partition; keyless
//! records go round-robin. `MemoryConsumer` tracks fetch positions, pauses
//! and commits the way a broker client does, without any network.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::{
    BusError, ConsumerRecord, Headers, PartitionController, ProducerRecord, PublishAck,
    RecordPublisher, Result, TopicPartition,
};
use crate::clock::{Clock, SystemClock};
use crate::container::RecordSource;

/// Partition count for topics created implicitly on first publish.
pub const DEFAULT_PARTITIONS: i32 = 1;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    headers: Headers,
    payload: Vec<u8>,
    timestamp: i64,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    round_robin: HashMap<String, usize>,
}

impl BrokerState {
    fn ensure_topic(&mut self, topic: &str, partitions: i32) -> usize {
        let partitions = partitions.max(1) as usize;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
            .len()
    }
}

/// Partitioned in-process log.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    clock: Arc<dyn Clock>,
    default_partitions: i32,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Broker whose record timestamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            clock,
            default_partitions: DEFAULT_PARTITIONS,
        }
    }

    /// Set the partition count used for implicitly created topics.
    pub fn with_default_partitions(mut self, partitions: i32) -> Self {
        self.default_partitions = partitions.max(1);
        self
    }

    /// Create a topic. Existing topics are left untouched.
    pub fn create_topic(&self, topic: &str, partitions: i32) {
        let count = self.state.lock().ensure_topic(topic, partitions);
        debug!(topic = %topic, partitions = count, "Topic ready");
    }

    pub fn partition_count(&self, topic: &str) -> Option<i32> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|parts| parts.len() as i32)
    }

    /// Every record currently in the topic, partition by partition.
    pub fn records(&self, topic: &str) -> Vec<ConsumerRecord> {
        let state = self.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, stored)| to_consumer_record(topic, partition as i32, offset as i64, stored))
            })
            .collect()
    }

    /// Create a consumer assigned to every partition of `topics`.
    pub fn consumer(&self, topics: &[String]) -> MemoryConsumer {
        let consumer = MemoryConsumer::new(Arc::clone(&self.state));
        for topic in topics {
            let partitions = self.state.lock().ensure_topic(topic, self.default_partitions);
            for partition in 0..partitions {
                consumer.assign(TopicPartition::new(topic.clone(), partition as i32));
            }
        }
        info!(topics = ?topics, "Memory consumer assigned");
        consumer
    }

    /// Stable partition for a key.
    pub fn partition_for_key(key: &[u8], partitions: usize) -> usize {
        let digest = Sha256::digest(key);
        let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        hash as usize % partitions.max(1)
    }
}

fn to_consumer_record(topic: &str, partition: i32, offset: i64, stored: &StoredRecord) -> ConsumerRecord {
    ConsumerRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: stored.key.clone(),
        headers: stored.headers.clone(),
        payload: stored.payload.clone(),
        timestamp: stored.timestamp,
    }
}

#[async_trait]
impl RecordPublisher for InMemoryBroker {
    async fn publish(&self, record: ProducerRecord) -> Result<PublishAck> {
        let timestamp = self.clock.now_millis();
        let mut state = self.state.lock();
        let partitions = state.ensure_topic(&record.topic, self.default_partitions);

        let partition = match (record.partition, record.key.as_deref()) {
            (Some(p), _) if p >= 0 && (p as usize) < partitions => p as usize,
            (Some(p), _) => {
                return Err(BusError::UnknownPartition(format!("{}-{}", record.topic, p)));
            }
            (None, Some(key)) => Self::partition_for_key(key, partitions),
            (None, None) => {
                let cursor = state.round_robin.entry(record.topic.clone()).or_insert(0);
                let p = *cursor % partitions;
                *cursor += 1;
                p
            }
        };

        let log = state
            .topics
            .get_mut(&record.topic)
            .and_then(|parts| parts.get_mut(partition))
            .ok_or_else(|| BusError::UnknownPartition(format!("{}-{}", record.topic, partition)))?;
        let offset = log.len() as i64;
        log.push(StoredRecord {
            key: record.key,
            headers: record.headers,
            payload: record.payload,
            timestamp,
        });

        debug!(
            topic = %record.topic,
            partition,
            offset,
            "Published record to memory broker"
        );

        Ok(PublishAck {
            topic: record.topic,
            partition: partition as i32,
            offset,
        })
    }
}

#[derive(Debug, Default)]
struct ConsumerState {
    /// Next offset to deliver per assigned partition.
    positions: BTreeMap<TopicPartition, i64>,
    committed: HashMap<TopicPartition, i64>,
    paused: HashSet<TopicPartition>,
    cursor: usize,
}

/// Consumer over an `InMemoryBroker`.
///
/// Delivers records in offset order per partition, rotating across
/// partitions so one busy partition cannot starve the rest.
pub struct MemoryConsumer {
    broker: Arc<Mutex<BrokerState>>,
    state: Mutex<ConsumerState>,
}

impl MemoryConsumer {
    fn new(broker: Arc<Mutex<BrokerState>>) -> Self {
        Self {
            broker,
            state: Mutex::new(ConsumerState::default()),
        }
    }

    /// Assign a partition, starting after its committed offset.
    pub fn assign(&self, tp: TopicPartition) {
        let mut state = self.state.lock();
        let start = state.committed.get(&tp).copied().unwrap_or(0);
        state.positions.entry(tp).or_insert(start);
    }

    /// Drop partitions from the assignment. Their pause state goes with them.
    pub fn revoke(&self, tps: &[TopicPartition]) {
        let mut state = self.state.lock();
        for tp in tps {
            state.positions.remove(tp);
            state.paused.remove(tp);
        }
    }

    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.state.lock().positions.keys().cloned().collect()
    }

    /// Next deliverable record, or `None` if every unpaused partition is drained.
    pub fn next_record(&self) -> Option<ConsumerRecord> {
        let mut state = self.state.lock();
        let broker = self.broker.lock();
        let assigned: Vec<TopicPartition> = state.positions.keys().cloned().collect();
        if assigned.is_empty() {
            return None;
        }

        for step in 0..assigned.len() {
            let idx = (state.cursor + step) % assigned.len();
            let tp = &assigned[idx];
            if state.paused.contains(tp) {
                continue;
            }
            let position = state.positions.get(tp).copied().unwrap_or(0);
            let stored = broker
                .topics
                .get(&tp.topic)
                .and_then(|parts| parts.get(tp.partition as usize))
                .and_then(|log| log.get(position as usize));

            if let Some(stored) = stored {
                let record = to_consumer_record(&tp.topic, tp.partition, position, stored);
                state.positions.insert(tp.clone(), position + 1);
                state.cursor = idx + 1;
                return Some(record);
            }
        }
        None
    }

    pub fn commit_offset(&self, tp: &TopicPartition, next_offset: i64) {
        self.state.lock().committed.insert(tp.clone(), next_offset);
    }

    /// Committed offset (the next offset to read) for a partition.
    pub fn committed(&self, tp: &TopicPartition) -> Option<i64> {
        self.state.lock().committed.get(tp).copied()
    }

    pub fn position(&self, tp: &TopicPartition) -> Option<i64> {
        self.state.lock().positions.get(tp).copied()
    }

    pub fn is_paused(&self, tp: &TopicPartition) -> bool {
        self.state.lock().paused.contains(tp)
    }
}

impl PartitionController for MemoryConsumer {
    fn pause(&self, tp: &TopicPartition) -> Result<()> {
        let mut state = self.state.lock();
        if !state.positions.contains_key(tp) {
            return Err(BusError::UnknownPartition(tp.to_string()));
        }
        state.paused.insert(tp.clone());
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<()> {
        self.state.lock().paused.remove(tp);
        Ok(())
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        let mut state = self.state.lock();
        match state.positions.get_mut(tp) {
            Some(position) => {
                *position = offset;
                Ok(())
            }
            None => Err(BusError::UnknownPartition(tp.to_string())),
        }
    }
}

#[async_trait]
impl RecordSource for MemoryConsumer {
    async fn poll(&self) -> Result<Option<ConsumerRecord>> {
        Ok(self.next_record())
    }

    async fn commit(&self, record: &ConsumerRecord) -> Result<()> {
        self.commit_offset(&record.topic_partition(), record.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
