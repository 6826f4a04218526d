//! Dead-letter / retry recoverer.
//!
//! Invoked once per failed listener invocation. Decides where the record
//! goes next (same hop, next retry hop or DLT), stamps provenance headers
//! and republishes it.
//!
//! ## Headers
//!
//! | Header | Set |
//! |---|---|
//! | `retry-topic-attempts` | every hop: failed deliveries across the chain |
//! | `retry-topic-hop-attempts` | every hop: failed deliveries on the destination hop so far |
//! | `retry-topic-backoff-due` | retry hops: epoch millis the record may be processed at |
//! | `retry-topic-origin-topic`, `-original-partition`, `-original-offset`, `-original-timestamp` | once, on the first republish |
//! | `retry-topic-exception-type`, `-exception-message` | every hop: the latest failure |
//! | `retry-topic-dlt` | DLT only |
//!
//! A publish failure is never swallowed: transient errors get a bounded
//! in-process retry, after which `RecoveryFailed` is returned and the source
//! offset must stay uncommitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use tracing::{debug, info, warn};

use crate::bus::headers::{
    ATTEMPTS, BACKOFF_DUE, DEAD_LETTER, EXCEPTION_MESSAGE, EXCEPTION_TYPE, HOP_ATTEMPTS,
    ORIGINAL_OFFSET, ORIGINAL_PARTITION, ORIGINAL_TIMESTAMP, ORIGIN_TOPIC,
};
use crate::bus::{BusError, ConsumerRecord, ProducerRecord, PublishAck, RecordPublisher};
use crate::clock::Clock;
use crate::config::{PartitionAssignment, PublishRetryConfig};
use crate::listener::ListenerError;
use crate::resolver::{DestinationTopicResolver, NextDestination, ResolverError};
use crate::topic::{DestinationTopic, DestinationTopicChain};
use crate::utils::retry::is_retryable_publish;

/// Result type for recovery.
pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Recovery errors.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Republishing failed after bounded retries. Leave the offset uncommitted.
    #[error("Failed to republish to '{topic}': {source}")]
    RecoveryFailed {
        topic: String,
        #[source]
        source: BusError,
    },

    /// No hop left. The record is logged and not republished.
    #[error("Retry chain for '{origin}' exhausted on '{topic}' after {attempts} attempts")]
    ExhaustedChain {
        origin: String,
        topic: String,
        attempts: u32,
    },

    #[error(transparent)]
    Resolve(#[from] ResolverError),
}

/// The failure being recovered from.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub error: ListenerError,
    /// Failed deliveries in this invocation (more than one after local retries).
    pub attempts: u32,
}

impl FailureContext {
    pub fn new(error: ListenerError) -> Self {
        Self { error, attempts: 1 }
    }

    pub fn with_attempts(error: ListenerError, attempts: u32) -> Self {
        Self {
            error,
            attempts: attempts.max(1),
        }
    }
}

/// Where the record was sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Republished {
        destination: DestinationTopic,
        due_timestamp: i64,
        ack: PublishAck,
    },
    DeadLettered {
        destination: DestinationTopic,
        ack: PublishAck,
    },
}

impl RecoveryOutcome {
    pub fn destination(&self) -> &DestinationTopic {
        match self {
            RecoveryOutcome::Republished { destination, .. }
            | RecoveryOutcome::DeadLettered { destination, .. } => destination,
        }
    }
}

/// Decides the next hop for a failed record and publishes it there.
#[async_trait]
pub trait Recoverer: Send + Sync {
    async fn recover(&self, record: &ConsumerRecord, failure: &FailureContext) -> Result<RecoveryOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Retry,
    NotRetryable,
    Timeout,
}

impl Route {
    fn as_str(self) -> &'static str {
        match self {
            Route::Retry => "retry",
            Route::NotRetryable => "not_retryable",
            Route::Timeout => "timeout",
        }
    }
}

/// Default recoverer: republishes through a `RecordPublisher`.
pub struct DeadLetterPublishingRecoverer {
    resolver: Arc<dyn DestinationTopicResolver>,
    publisher: Arc<dyn RecordPublisher>,
    clock: Arc<dyn Clock>,
    retry: PublishRetryConfig,
}

impl DeadLetterPublishingRecoverer {
    pub fn new(
        resolver: Arc<dyn DestinationTopicResolver>,
        publisher: Arc<dyn RecordPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            publisher,
            clock,
            retry: PublishRetryConfig::default(),
        }
    }

    pub fn with_publish_retry(mut self, retry: PublishRetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn route(&self, chain: &DestinationTopicChain, record: &ConsumerRecord, error: &ListenerError, now: i64) -> Route {
        let policy = chain.policy();
        if !error.retryable || policy.is_not_retryable(&error.kind) {
            return Route::NotRetryable;
        }
        if let Some(timeout_ms) = policy.timeout_ms {
            let started = record
                .headers
                .get_i64(ORIGINAL_TIMESTAMP)
                .unwrap_or(record.timestamp);
            if now.saturating_sub(started) >= i64::try_from(timeout_ms).unwrap_or(i64::MAX) {
                return Route::Timeout;
            }
        }
        Route::Retry
    }

    async fn publish(&self, record: ProducerRecord) -> std::result::Result<PublishAck, BusError> {
        let topic = record.topic.clone();
        (|| async { self.publisher.publish(record.clone()).await })
            .retry(self.retry.backoff())
            .when(is_retryable_publish)
            .notify(|e: &BusError, delay: Duration| {
                warn!(
                    topic = %topic,
                    error = %e,
                    retry_in = ?delay,
                    "Recovery publish failed, retrying"
                );
            })
            .await
    }
}

/// Header values written on a republished record.
struct Stamp {
    attempts: u32,
    hop_attempts: u32,
    /// Due time on retry hops; `None` for the DLT.
    due: Option<i64>,
}

fn build_record(
    record: &ConsumerRecord,
    failure: &FailureContext,
    destination: &DestinationTopic,
    assignment: PartitionAssignment,
    stamp: &Stamp,
) -> ProducerRecord {
    let mut headers = record.headers.clone();
    headers.insert_i64(ATTEMPTS, stamp.attempts as i64);
    headers.insert_i64(HOP_ATTEMPTS, stamp.hop_attempts as i64);
    headers.insert_if_absent(ORIGIN_TOPIC, record.topic.as_bytes().to_vec());
    headers.insert_if_absent(ORIGINAL_PARTITION, record.partition.to_string().into_bytes());
    headers.insert_if_absent(ORIGINAL_OFFSET, record.offset.to_string().into_bytes());
    headers.insert_if_absent(ORIGINAL_TIMESTAMP, record.timestamp.to_string().into_bytes());
    headers.insert_str(EXCEPTION_TYPE, &failure.error.kind);
    headers.insert_str(EXCEPTION_MESSAGE, &failure.error.message);

    match stamp.due {
        Some(due) => {
            headers.insert_i64(BACKOFF_DUE, due);
            headers.remove(DEAD_LETTER);
        }
        None => {
            headers.remove(BACKOFF_DUE);
            headers.insert_str(DEAD_LETTER, "true");
        }
    }

    let mut out = ProducerRecord::new(destination.topic.clone(), record.payload.clone()).with_headers(headers);
    if let Some(key) = &record.key {
        out = out.with_key(key.clone());
    }
    if assignment == PartitionAssignment::SameAsSource {
        out = out.with_partition(record.partition);
    }
    out
}

#[async_trait]
impl Recoverer for DeadLetterPublishingRecoverer {
    async fn recover(&self, record: &ConsumerRecord, failure: &FailureContext) -> Result<RecoveryOutcome> {
        let chain = self.resolver.chain_for_topic(&record.topic)?;
        let origin = chain.origin();
        let now = self.clock.now_millis();

        let attempts = record
            .headers
            .get_u32(ATTEMPTS)
            .unwrap_or(0)
            .saturating_add(failure.attempts);
        let hop_attempts = record
            .headers
            .get_u32(HOP_ATTEMPTS)
            .unwrap_or(0)
            .saturating_add(failure.attempts);

        let route = self.route(&chain, record, &failure.error, now);
        let next = match route {
            Route::Retry => self
                .resolver
                .resolve_next_destination(origin, &record.topic, hop_attempts)?,
            Route::NotRetryable | Route::Timeout => {
                self.resolver.dead_letter_destination(origin, &record.topic)?
            }
        };

        let destination = match next {
            NextDestination::Topic(destination) => destination,
            NextDestination::Exhausted => {
                #[cfg(feature = "otel")]
                {
                    use crate::utils::metrics::{self, EXHAUSTED_TOTAL};
                    EXHAUSTED_TOTAL.add(1, &[metrics::origin_attr(origin), metrics::topic_attr(&record.topic)]);
                }
                return Err(RecoveryError::ExhaustedChain {
                    origin: origin.to_string(),
                    topic: record.topic.clone(),
                    attempts,
                });
            }
        };

        let stamp = Stamp {
            attempts,
            hop_attempts: if destination.topic == record.topic { hop_attempts } else { 0 },
            due: (!destination.is_dlt())
                .then(|| now.saturating_add(i64::try_from(destination.delay_ms).unwrap_or(i64::MAX))),
        };
        let out = build_record(
            record,
            failure,
            &destination,
            chain.policy().partition_assignment,
            &stamp,
        );
        debug!(
            topic = %record.topic,
            offset = record.offset,
            destination = %destination.topic,
            attempts,
            reason = route.as_str(),
            "Recovering failed record"
        );

        #[cfg(feature = "otel")]
        let publish_start = std::time::Instant::now();

        let publish_result = self.publish(out).await;

        #[cfg(feature = "otel")]
        {
            use crate::utils::metrics::{self, RECOVERY_DURATION};
            let outcome = if publish_result.is_ok() { "success" } else { "error" };
            RECOVERY_DURATION.record(publish_start.elapsed().as_secs_f64(), &[
                metrics::origin_attr(origin),
                metrics::outcome_attr(outcome),
            ]);
        }

        let ack = publish_result.map_err(|source| RecoveryError::RecoveryFailed {
            topic: destination.topic.clone(),
            source,
        })?;

        match stamp.due {
            Some(due_timestamp) => {
                info!(
                    topic = %record.topic,
                    offset = record.offset,
                    destination = %destination.topic,
                    attempts,
                    due_timestamp,
                    "Republished record to retry topic"
                );
                #[cfg(feature = "otel")]
                {
                    use crate::utils::metrics::{self, RETRY_PUBLISH_TOTAL};
                    RETRY_PUBLISH_TOTAL.add(1, &[metrics::origin_attr(origin), metrics::topic_attr(&destination.topic)]);
                }
                Ok(RecoveryOutcome::Republished {
                    destination,
                    due_timestamp,
                    ack,
                })
            }
            None => {
                warn!(
                    topic = %record.topic,
                    offset = record.offset,
                    destination = %destination.topic,
                    attempts,
                    reason = route.as_str(),
                    error = %failure.error,
                    "Published record to dead-letter topic"
                );
                #[cfg(feature = "otel")]
                {
                    use crate::utils::metrics::{self, DLT_PUBLISH_TOTAL};
                    DLT_PUBLISH_TOTAL.add(1, &[metrics::origin_attr(origin), metrics::reason_attr(route.as_str())]);
                }
                Ok(RecoveryOutcome::DeadLettered { destination, ack })
            }
        }
    }
}

#[cfg(test)]
mod tests;
