//! Consumer backoff manager.
//!
//! Holds back records on retry topics until their due time without blocking
//! the consumer loop or other partitions:
//!
//! 1. A record that is not yet due pauses its partition and seeks the
//!    partition back to the record's offset, so it is fetched again.
//! 2. A resume is scheduled: a timer per paused partition, or a periodic
//!    sweep over all pending partitions.
//! 3. After resume the same offset is redelivered; it is now due and
//!    processing proceeds.
//!
//! State is in memory only and keyed by topic-partition. Since records on a
//! partition are handled in offset order, the lowest pending offset on a
//! partition is the only one that matters. Revocation drops the partition's
//! entry, which turns any scheduled resume for it into a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::bus::{BusError, PartitionController, TopicPartition};
use crate::clock::Clock;
use crate::config::{BackoffManagerConfig, ResumeStrategy};

/// Delay before a timer retries a resume that failed.
const RESUME_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Outcome of a due-time check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// The record is due; hand it to the listener.
    Proceed,
    /// The partition is paused; do not commit this offset.
    Paused,
}

/// A record held back on a paused partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffExecution {
    pub topic_partition: TopicPartition,
    pub offset: i64,
    pub due_timestamp: i64,
}

struct PendingBackoff {
    offset: i64,
    due: i64,
    generation: u64,
    controller: Arc<dyn PartitionController>,
}

struct Shared {
    clock: Arc<dyn Clock>,
    pending: Mutex<HashMap<TopicPartition, PendingBackoff>>,
    generation: AtomicU64,
}

impl Shared {
    /// Resume `tp` if its entry is due. With `generation`, only the entry
    /// that scheduled this resume is eligible.
    fn resume_if_due(&self, tp: &TopicPartition, generation: Option<u64>) -> bool {
        let now = self.clock.now_millis();
        let mut pending = self.pending.lock();
        let Some(entry) = pending
            .get(tp)
            .filter(|entry| generation.map_or(true, |g| g == entry.generation) && now >= entry.due)
        else {
            return false;
        };

        // The entry stays until the resume succeeds so the next timer tick
        // or sweep retries it.
        match entry.controller.resume(tp) {
            Ok(()) => {
                info!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    offset = entry.offset,
                    "Resumed partition after backoff"
                );
                pending.remove(tp);
                #[cfg(feature = "otel")]
                {
                    use crate::utils::metrics::{self, PARTITION_RESUME_TOTAL};
                    PARTITION_RESUME_TOTAL.add(1, &[metrics::topic_attr(&tp.topic)]);
                }
                true
            }
            Err(e) => {
                warn!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    error = %e,
                    "Failed to resume partition, will retry"
                );
                false
            }
        }
    }

    /// Milliseconds until the entry scheduled under `generation` is due, or
    /// `None` if that entry is gone.
    fn remaining(&self, tp: &TopicPartition, generation: u64) -> Option<i64> {
        let pending = self.pending.lock();
        pending
            .get(tp)
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.due.saturating_sub(self.clock.now_millis()))
    }
}

/// Tracks due times per partition and drives pause/resume.
///
/// Safe to call from any number of consumer tasks; a single lock guards the
/// pending table shared with resume timers and the sweeper.
#[derive(Clone)]
pub struct ConsumerBackoffManager {
    shared: Arc<Shared>,
    resume: ResumeStrategy,
}

impl ConsumerBackoffManager {
    pub fn new(clock: Arc<dyn Clock>, config: &BackoffManagerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                clock,
                pending: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
            resume: config.resume,
        }
    }

    pub fn resume_strategy(&self) -> ResumeStrategy {
        self.resume
    }

    /// Decide whether the record at `offset` may be processed now.
    ///
    /// Returns `Paused` when the record is not yet due, or when an earlier
    /// offset on the same partition is still pending. In both cases the
    /// partition is paused and positioned at the pending offset.
    pub fn maybe_backoff(
        &self,
        controller: &Arc<dyn PartitionController>,
        tp: &TopicPartition,
        offset: i64,
        due_timestamp: i64,
    ) -> Result<BackoffDecision, BusError> {
        let now = self.shared.clock.now_millis();
        let mut pending = self.shared.pending.lock();

        if let Some(entry) = pending.get(tp) {
            if entry.offset < offset {
                debug!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    offset,
                    pending_offset = entry.offset,
                    "Earlier offset still backing off, rewinding"
                );
                controller.pause(tp)?;
                controller.seek(tp, entry.offset)?;
                return Ok(BackoffDecision::Paused);
            }
        }

        if now >= due_timestamp {
            if let Some(entry) = pending.get(tp) {
                // The pending record was fetched before its resume fired.
                entry.controller.resume(tp)?;
                pending.remove(tp);
            }
            return Ok(BackoffDecision::Proceed);
        }

        // Timer mode needs a runtime to resume; refuse before pausing.
        let timer = match self.resume {
            ResumeStrategy::Timer => Some(Handle::try_current().map_err(|_| {
                BusError::Consumer(format!(
                    "No async runtime for resume timer on {}-{}",
                    tp.topic, tp.partition
                ))
            })?),
            ResumeStrategy::Sweep => None,
        };

        controller.pause(tp)?;
        controller.seek(tp, offset)?;

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed);
        pending.insert(
            tp.clone(),
            PendingBackoff {
                offset,
                due: due_timestamp,
                generation,
                controller: Arc::clone(controller),
            },
        );
        drop(pending);

        info!(
            topic = %tp.topic,
            partition = tp.partition,
            offset,
            due_timestamp,
            wait_ms = due_timestamp.saturating_sub(now),
            "Paused partition until record is due"
        );
        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{self, PARTITION_PAUSE_TOTAL};
            PARTITION_PAUSE_TOTAL.add(1, &[metrics::topic_attr(&tp.topic)]);
        }

        if let Some(handle) = timer {
            self.schedule_resume(handle, tp.clone(), generation);
        }
        Ok(BackoffDecision::Paused)
    }

    fn schedule_resume(&self, handle: Handle, tp: TopicPartition, generation: u64) {
        let shared = Arc::clone(&self.shared);
        handle.spawn(async move {
            // Re-check after every sleep: the clock may be injected and lag
            // behind the runtime's timer.
            while let Some(wait) = shared.remaining(&tp, generation) {
                if wait > 0 {
                    tokio::time::sleep(Duration::from_millis(wait as u64)).await;
                } else if shared.resume_if_due(&tp, Some(generation)) {
                    return;
                } else {
                    tokio::time::sleep(RESUME_RETRY_DELAY).await;
                }
            }
        });
    }

    /// Resume every pending partition whose due time has passed.
    pub fn sweep(&self) -> Vec<TopicPartition> {
        let candidates: Vec<TopicPartition> = {
            let now = self.shared.clock.now_millis();
            self.shared
                .pending
                .lock()
                .iter()
                .filter(|(_, entry)| now >= entry.due)
                .map(|(tp, _)| tp.clone())
                .collect()
        };
        candidates
            .into_iter()
            .filter(|tp| self.shared.resume_if_due(tp, None))
            .collect()
    }

    /// Spawn a task that sweeps every `period` until `shutdown` flips to true.
    pub fn spawn_sweeper(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            info!(interval = ?period, "Starting backoff sweeper");
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let resumed = manager.sweep();
                        if !resumed.is_empty() {
                            debug!(count = resumed.len(), "Sweep resumed partitions");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Backoff sweeper stopped");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Drop backoff state for partitions this consumer no longer owns.
    ///
    /// No resume is issued; the partitions are gone from the assignment.
    pub fn on_partitions_revoked(&self, tps: &[TopicPartition]) {
        let mut pending = self.shared.pending.lock();
        for tp in tps {
            if pending.remove(tp).is_some() {
                info!(
                    topic = %tp.topic,
                    partition = tp.partition,
                    "Dropped backoff state for revoked partition"
                );
            }
        }
    }

    /// The record currently holding `tp` paused, if any.
    pub fn pending(&self, tp: &TopicPartition) -> Option<BackoffExecution> {
        self.shared.pending.lock().get(tp).map(|entry| BackoffExecution {
            topic_partition: tp.clone(),
            offset: entry.offset,
            due_timestamp: entry.due,
        })
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

#[cfg(test)]
mod tests;
