//! Shared helpers: tracing setup, backoff builders, metrics.

pub mod bootstrap;
#[cfg(feature = "otel")]
pub mod metrics;
pub mod retry;
