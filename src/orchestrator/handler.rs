//! Backoff-aware error handling around a record listener.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::backoff::{BackoffDecision, ConsumerBackoffManager};
use crate::bus::headers::{BACKOFF_DUE, HOP_ATTEMPTS};
use crate::bus::{BusError, ConsumerRecord, PartitionController};
use crate::config::HopRetryMode;
use crate::listener::{ListenerError, LoggingDltHandler, RecordListener};
use crate::recoverer::{FailureContext, RecoveryError, RecoveryOutcome, Recoverer};
use crate::resolver::DestinationTopicResolver;
use crate::topic::{DestinationTopic, DestinationTopicChain};

/// What happened to a delivered record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The listener succeeded.
    Processed,
    /// Not yet due; the partition is paused and the record will be redelivered.
    Paused,
    /// The listener failed and the record was republished.
    Recovered(RecoveryOutcome),
    /// The chain has no hop left. Logged, not republished.
    Exhausted,
}

impl Disposition {
    /// Whether the record's offset may be committed.
    pub fn should_commit(&self) -> bool {
        !matches!(self, Disposition::Paused)
    }
}

/// Errors that leave the record's offset uncommitted.
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("Partition control failed: {0}")]
    Bus(#[from] BusError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),
}

/// A user listener plus its optional DLT handler.
#[derive(Clone)]
pub struct ListenerEndpoint {
    pub id: String,
    pub listener: Arc<dyn RecordListener>,
    pub dlt_handler: Option<Arc<dyn RecordListener>>,
}

impl ListenerEndpoint {
    pub fn new(id: impl Into<String>, listener: Arc<dyn RecordListener>) -> Self {
        Self {
            id: id.into(),
            listener,
            dlt_handler: None,
        }
    }

    pub fn with_dlt_handler(mut self, handler: Arc<dyn RecordListener>) -> Self {
        self.dlt_handler = Some(handler);
        self
    }
}

/// Listener for every hop of one chain.
///
/// Retry hops are gated by the backoff manager, failures are handed to the
/// recoverer, and DLT records go to the DLT handler.
pub struct RetryTopicListener {
    id: String,
    chain: Arc<DestinationTopicChain>,
    listener: Arc<dyn RecordListener>,
    dlt_handler: Arc<dyn RecordListener>,
    resolver: Arc<dyn DestinationTopicResolver>,
    backoff: ConsumerBackoffManager,
    recoverer: Arc<dyn Recoverer>,
}

impl RetryTopicListener {
    pub(crate) fn new(
        endpoint: ListenerEndpoint,
        chain: Arc<DestinationTopicChain>,
        resolver: Arc<dyn DestinationTopicResolver>,
        backoff: ConsumerBackoffManager,
        recoverer: Arc<dyn Recoverer>,
    ) -> Self {
        Self {
            id: endpoint.id,
            chain,
            listener: endpoint.listener,
            dlt_handler: endpoint
                .dlt_handler
                .unwrap_or_else(|| Arc::new(LoggingDltHandler)),
            resolver,
            backoff,
            recoverer,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn chain(&self) -> &Arc<DestinationTopicChain> {
        &self.chain
    }

    /// Topics a consumer for this listener must subscribe to.
    pub fn topics(&self) -> Vec<String> {
        self.chain.topic_names().into_iter().map(str::to_string).collect()
    }

    /// Handle one delivered record.
    ///
    /// Errors mean the offset must not be committed: a pause or seek failed,
    /// or recovery could not publish.
    pub async fn handle(
        &self,
        record: Arc<ConsumerRecord>,
        controller: &Arc<dyn PartitionController>,
    ) -> Result<Disposition, HandleError> {
        let hop = self
            .resolver
            .destination_for(&record.topic)
            .map_err(RecoveryError::from)?;

        if hop.is_retry() {
            if let Some(due) = record.headers.get_i64(BACKOFF_DUE) {
                let decision =
                    self.backoff
                        .maybe_backoff(controller, &record.topic_partition(), record.offset, due)?;
                if decision == BackoffDecision::Paused {
                    return Ok(Disposition::Paused);
                }
            }
        }

        if hop.is_dlt() {
            return Ok(self.handle_dead_letter(record).await);
        }

        let (error, attempts) = match self.invoke(&hop, Arc::clone(&record)).await {
            Ok(()) => {
                debug!(
                    listener = %self.id,
                    topic = %record.topic,
                    offset = record.offset,
                    "Record processed"
                );
                return Ok(Disposition::Processed);
            }
            Err(failure) => failure,
        };

        warn!(
            listener = %self.id,
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            attempts,
            error = %error,
            "Listener failed, recovering record"
        );

        match self
            .recoverer
            .recover(&record, &FailureContext::with_attempts(error, attempts))
            .await
        {
            Ok(outcome) => Ok(Disposition::Recovered(outcome)),
            Err(RecoveryError::ExhaustedChain {
                origin,
                topic,
                attempts,
            }) => {
                error!(
                    listener = %self.id,
                    origin = %origin,
                    topic = %topic,
                    offset = record.offset,
                    attempts,
                    "Retry chain exhausted, record dropped"
                );
                Ok(Disposition::Exhausted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the listener once, or up to the hop's remaining attempts in
    /// local mode. Returns the last failure and the number of failed runs.
    async fn invoke(
        &self,
        hop: &DestinationTopic,
        record: Arc<ConsumerRecord>,
    ) -> Result<(), (ListenerError, u32)> {
        let budget = match self.chain.policy().hop_retry {
            HopRetryMode::Republish => 1,
            HopRetryMode::Local => {
                let used = record.headers.get_u32(HOP_ATTEMPTS).unwrap_or(0);
                hop.max_attempts.saturating_sub(used).max(1)
            }
        };

        let mut failures = 0;
        loop {
            match self.listener.on_record(Arc::clone(&record)).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    failures += 1;
                    if failures >= budget || !error.retryable {
                        return Err((error, failures));
                    }
                    debug!(
                        listener = %self.id,
                        topic = %record.topic,
                        offset = record.offset,
                        attempt = failures,
                        budget,
                        error = %error,
                        "Retrying record locally"
                    );
                }
            }
        }
    }

    async fn handle_dead_letter(&self, record: Arc<ConsumerRecord>) -> Disposition {
        let topic = record.topic.clone();
        let offset = record.offset;
        match self.dlt_handler.on_record(record).await {
            Ok(()) => Disposition::Processed,
            Err(e) => {
                error!(
                    listener = %self.id,
                    topic = %topic,
                    offset,
                    error = %e,
                    "DLT handler failed, record not republished"
                );
                #[cfg(feature = "otel")]
                {
                    use crate::utils::metrics::{self, EXHAUSTED_TOTAL};
                    EXHAUSTED_TOTAL.add(1, &[metrics::origin_attr(self.chain.origin()), metrics::topic_attr(&topic)]);
                }
                Disposition::Exhausted
            }
        }
    }
}
