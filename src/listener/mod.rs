//! Record listeners and listener failures.
//!
//! A `RecordListener` is the user's business handler. Returning an error
//! never drops the record: the retry listener turns it into a recovery
//! action (next hop or DLT).

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::error;

use crate::bus::headers::{
    ATTEMPTS, EXCEPTION_MESSAGE, EXCEPTION_TYPE, ORIGINAL_OFFSET, ORIGINAL_PARTITION, ORIGIN_TOPIC,
};
use crate::bus::ConsumerRecord;

/// Failure raised by a record listener.
///
/// `kind` names the failure class and is matched against a chain's
/// `not_retryable` list. `retryable = false` sends the record straight to the
/// DLT.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ListenerError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl ListenerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that will not succeed on retry.
    pub fn fatal(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(kind, message)
        }
    }

    /// Wrap any error, naming the failure after its type.
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        let kind = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("Error");
        Self::new(kind, error.to_string())
    }
}

/// Business handler for consumed records.
pub trait RecordListener: Send + Sync {
    /// Process a record. An error triggers recovery.
    fn on_record(&self, record: Arc<ConsumerRecord>) -> BoxFuture<'static, Result<(), ListenerError>>;
}

/// Adapts an async closure into a `RecordListener`.
pub struct FnListener<F> {
    f: F,
}

impl<F, Fut> FnListener<F>
where
    F: Fn(Arc<ConsumerRecord>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> RecordListener for FnListener<F>
where
    F: Fn(Arc<ConsumerRecord>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    fn on_record(&self, record: Arc<ConsumerRecord>) -> BoxFuture<'static, Result<(), ListenerError>> {
        (self.f)(record).boxed()
    }
}

impl<F> fmt::Debug for FnListener<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener").finish_non_exhaustive()
    }
}

/// Default DLT handler: logs the dead-lettered record with its provenance.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDltHandler;

impl RecordListener for LoggingDltHandler {
    fn on_record(&self, record: Arc<ConsumerRecord>) -> BoxFuture<'static, Result<(), ListenerError>> {
        async move {
            error!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                key = ?record.key_hex(),
                origin_topic = ?record.headers.get_str(ORIGIN_TOPIC),
                original_partition = ?record.headers.get_i64(ORIGINAL_PARTITION),
                original_offset = ?record.headers.get_i64(ORIGINAL_OFFSET),
                attempts = ?record.headers.get_u32(ATTEMPTS),
                exception_type = ?record.headers.get_str(EXCEPTION_TYPE),
                exception_message = ?record.headers.get_str(EXCEPTION_MESSAGE),
                "Record dead-lettered"
            );
            Ok(())
        }
        .boxed()
    }
}
