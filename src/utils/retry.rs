//! Retry utilities: backoff builders for broker operations.
//!
//! Uses `backon` for exponential backoff with jitter. Retry-topic delays are
//! not retried this way; they are expressed as hops through retry topics.
//! This is only for the bounded in-process retry around a single publish.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::bus::BusError;

/// Backoff for recovery publishes.
///
/// - Min delay: `min_delay`
/// - Max delay: `max_delay`
/// - Max attempts: `max_times` retries after the first try
/// - Jitter enabled
pub fn publish_backoff(min_delay: Duration, max_delay: Duration, max_times: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(min_delay)
        .with_max_delay(max_delay)
        .with_max_times(max_times)
        .with_jitter()
}

/// Backoff for connecting to the broker at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    publish_backoff(Duration::from_millis(100), Duration::from_secs(5), 30)
}

/// Determines if a publish error is worth retrying in-process.
///
/// Retryable: broker unavailable, rejected publish, timeout.
/// Non-retryable: serialization and routing errors, which fail the same way
/// on every attempt.
pub fn is_retryable_publish(error: &BusError) -> bool {
    error.is_transient()
}
