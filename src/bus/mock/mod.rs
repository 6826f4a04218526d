//! Mock publisher and partition controller for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::RwLock;

use super::{BusError, PartitionController, ProducerRecord, PublishAck, RecordPublisher, Result, TopicPartition};

/// Mock publisher that keeps every published record in memory.
#[derive(Default)]
pub struct MockPublisher {
    published: RwLock<Vec<ProducerRecord>>,
    offsets: RwLock<HashMap<String, i64>>,
    fail_on_publish: RwLock<bool>,
    transient_failures: RwLock<u32>,
    attempts: RwLock<u32>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every publish with a transient error.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Fail the next `count` publishes with a transient error, then succeed.
    pub async fn fail_next(&self, count: u32) {
        *self.transient_failures.write().await = count;
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    /// Total publish calls, including failed ones.
    pub async fn attempt_count(&self) -> u32 {
        *self.attempts.read().await
    }

    pub async fn take_published(&self) -> Vec<ProducerRecord> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl RecordPublisher for MockPublisher {
    async fn publish(&self, record: ProducerRecord) -> Result<PublishAck> {
        *self.attempts.write().await += 1;

        if *self.fail_on_publish.read().await {
            return Err(BusError::Connection("Mock publish failure".to_string()));
        }
        {
            let mut remaining = self.transient_failures.write().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BusError::Publish("Mock transient failure".to_string()));
            }
        }

        let offset = {
            let mut offsets = self.offsets.write().await;
            let next = offsets.entry(record.topic.clone()).or_insert(0);
            let offset = *next;
            *next += 1;
            offset
        };
        let ack = PublishAck {
            topic: record.topic.clone(),
            partition: record.partition.unwrap_or(0),
            offset,
        };
        self.published.write().await.push(record);
        Ok(ack)
    }
}

/// A call observed by `RecordingController`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Pause(TopicPartition),
    Resume(TopicPartition),
    Seek(TopicPartition, i64),
}

/// Partition controller that records calls instead of touching a consumer.
#[derive(Default)]
pub struct RecordingController {
    calls: Mutex<Vec<ControllerCall>>,
    resume_failures: Mutex<u32>,
}

impl RecordingController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` resumes, then succeed. Failed resumes are not
    /// recorded.
    pub fn fail_next_resumes(&self, count: u32) {
        *self.resume_failures.lock() = count;
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().clone()
    }

    pub fn pause_count(&self, tp: &TopicPartition) -> usize {
        self.count(|c| matches!(c, ControllerCall::Pause(p) if p == tp))
    }

    pub fn resume_count(&self, tp: &TopicPartition) -> usize {
        self.count(|c| matches!(c, ControllerCall::Resume(p) if p == tp))
    }

    fn count(&self, predicate: impl Fn(&ControllerCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }
}

impl PartitionController for RecordingController {
    fn pause(&self, tp: &TopicPartition) -> Result<()> {
        self.calls.lock().push(ControllerCall::Pause(tp.clone()));
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<()> {
        {
            let mut remaining = self.resume_failures.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BusError::Consumer("Mock resume failure".to_string()));
            }
        }
        self.calls.lock().push(ControllerCall::Resume(tp.clone()));
        Ok(())
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<()> {
        self.calls
            .lock()
            .push(ControllerCall::Seek(tp.clone(), offset));
        Ok(())
    }
}
