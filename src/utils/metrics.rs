//! OTel-native metrics instruments.
//!
//! All instruments are lazily initialized and feature-gated behind `otel`.
//! Naming follows OTel semantic conventions (dot-separated).

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{global, KeyValue};

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("retrytopic"));

// ============================================================================
// Recovery
// ============================================================================

/// Records republished to a retry hop.
pub static RETRY_PUBLISH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("retrytopic.retry.publish.total")
        .with_description("Total records republished to a retry topic")
        .build()
});

/// Records published to a dead-letter topic.
pub static DLT_PUBLISH_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("retrytopic.dlt.publish.total")
        .with_description("Total records published to a dead-letter topic")
        .build()
});

/// Duration of recovery publishes, including in-process retries.
pub static RECOVERY_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("retrytopic.recovery.duration")
        .with_description("Recovery publish duration")
        .with_unit("s")
        .build()
});

/// Records whose chain ended without a destination.
pub static EXHAUSTED_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("retrytopic.exhausted.total")
        .with_description("Total records that exhausted their retry chain")
        .build()
});

// ============================================================================
// Backoff
// ============================================================================

/// Partition pauses for records that are not yet due.
pub static PARTITION_PAUSE_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("retrytopic.partition.pause.total")
        .with_description("Total partition pauses")
        .build()
});

/// Partition resumes after backoff.
pub static PARTITION_RESUME_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("retrytopic.partition.resume.total")
        .with_description("Total partition resumes")
        .build()
});

// ============================================================================
// Helper
// ============================================================================

/// Create a topic label.
pub fn topic_attr(topic: &str) -> KeyValue {
    KeyValue::new("topic", topic.to_string())
}

/// Create an origin topic label.
pub fn origin_attr(origin: &str) -> KeyValue {
    KeyValue::new("origin", origin.to_string())
}

/// Create an outcome label.
pub fn outcome_attr(outcome: &str) -> KeyValue {
    KeyValue::new("outcome", outcome.to_string())
}

/// Create a reason label (retry, not_retryable, timeout, exhausted).
pub fn reason_attr(reason: &str) -> KeyValue {
    KeyValue::new("reason", reason.to_string())
}
