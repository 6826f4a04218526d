//! Listener container: the consume loop.
//!
//! Polls a `RecordSource`, runs each record through a `RetryTopicListener`
//! and commits according to the outcome:
//!
//! | Outcome | Offset |
//! |---|---|
//! | processed, recovered, exhausted | committed |
//! | paused (not yet due) | not committed, partition rewound by the backoff manager |
//! | recovery failed | not committed, partition rewound to the record |

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::bus::{self, ConsumerRecord, PartitionController};
use crate::config::ContainerConfig;
use crate::orchestrator::{Disposition, HandleError, RetryTopicListener};

/// Source of consumed records with per-record commit.
///
/// Implementations:
/// - `MemoryConsumer`: in-memory broker consumer
/// - `KafkaRecordSource`: rdkafka `StreamConsumer`
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Next record, or `None` when nothing is currently deliverable.
    async fn poll(&self) -> bus::Result<Option<ConsumerRecord>>;

    /// Commit past `record` (the next read starts after it).
    async fn commit(&self, record: &ConsumerRecord) -> bus::Result<()>;
}

/// Errors from a single poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error(transparent)]
    Bus(#[from] bus::BusError),

    #[error(transparent)]
    Handle(#[from] HandleError),
}

/// Drives one record source through one retry topic listener.
pub struct ListenerContainer {
    source: Arc<dyn RecordSource>,
    controller: Arc<dyn PartitionController>,
    listener: Arc<RetryTopicListener>,
    config: ContainerConfig,
}

impl ListenerContainer {
    pub fn new(
        source: Arc<dyn RecordSource>,
        controller: Arc<dyn PartitionController>,
        listener: Arc<RetryTopicListener>,
    ) -> Self {
        Self {
            source,
            controller,
            listener,
            config: ContainerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Poll and handle at most one record.
    ///
    /// Returns `Ok(None)` when the source had nothing to deliver.
    pub async fn poll_once(&self) -> Result<Option<Disposition>, ContainerError> {
        let Some(record) = self.source.poll().await? else {
            return Ok(None);
        };
        let record = Arc::new(record);

        match self.listener.handle(Arc::clone(&record), &self.controller).await {
            Ok(disposition) => {
                if disposition.should_commit() {
                    self.source.commit(&record).await?;
                }
                debug!(
                    listener = %self.listener.id(),
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    disposition = ?disposition,
                    "Record handled"
                );
                Ok(Some(disposition))
            }
            Err(e) => {
                error!(
                    listener = %self.listener.id(),
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Record handling failed, offset left uncommitted"
                );
                self.controller.seek(&record.topic_partition(), record.offset)?;
                Err(e.into())
            }
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            listener = %self.listener.id(),
            topics = ?self.listener.topics(),
            "Starting listener container"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.poll_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => self.config.idle_interval(),
                Err(_) => self.config.recovery_retry_interval(),
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(listener = %self.listener.id(), "Listener container stopped");
    }
}
