//! Runtime knobs for the backoff manager, recovery publishing and the
//! listener container.

use std::time::Duration;

use backon::ExponentialBuilder;
use serde::Deserialize;

use crate::utils::retry::publish_backoff;

/// How paused partitions get resumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumeStrategy {
    /// One timer per paused partition, fired at the due time.
    #[default]
    Timer,
    /// A periodic sweep resumes every partition whose due time has passed.
    Sweep,
}

/// Consumer backoff manager configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffManagerConfig {
    pub resume: ResumeStrategy,
    /// Sweep period when `resume` is `sweep`.
    pub sweep_interval_ms: u64,
}

impl Default for BackoffManagerConfig {
    fn default() -> Self {
        Self {
            resume: ResumeStrategy::Timer,
            sweep_interval_ms: 100,
        }
    }
}

impl BackoffManagerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Bounded retry applied to recovery publishes.
///
/// Only transient broker errors are retried. After `max_retries` the
/// recovery fails and the source offset stays uncommitted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishRetryConfig {
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

impl PublishRetryConfig {
    /// No retries; the first failure is final.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn backoff(&self) -> ExponentialBuilder {
        publish_backoff(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)),
            self.max_retries,
        )
    }
}

/// Listener container poll loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Sleep when a poll returns nothing.
    pub idle_interval_ms: u64,
    /// Sleep after a failed recovery before the record is redelivered.
    pub recovery_retry_interval_ms: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: 50,
            recovery_retry_interval_ms: 1000,
        }
    }
}

impl ContainerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn recovery_retry_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_retry_interval_ms)
    }
}
