//! Per-origin retry chain configuration.

use serde::Deserialize;

use super::ConfigError;

/// Default suffix for retry hops.
pub const DEFAULT_RETRY_SUFFIX: &str = "-retry";
/// Default suffix for the dead-letter hop.
pub const DEFAULT_DLT_SUFFIX: &str = "-dlt";
/// Largest delay or timeout that still fits a millisecond timestamp.
pub const MAX_DURATION_MS: u64 = i64::MAX as u64;

/// Delay policy across retry hops.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Same delay for every hop.
    Fixed { delay_ms: u64 },
    /// `initial_ms * multiplier^hop`, capped at `max_ms`.
    Exponential {
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed { delay_ms: 1000 }
    }
}

impl BackoffPolicy {
    /// Delay for a retry hop (0-indexed).
    pub fn delay_for_hop(&self, hop: u32) -> u64 {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => delay_ms,
            BackoffPolicy::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                // Exponent capped so powi stays finite; the cap is far past
                // any realistic max_ms anyway.
                let factor = multiplier.powi(hop.min(64) as i32);
                let delay = initial_ms as f64 * factor;
                if !delay.is_finite() || delay >= max_ms as f64 {
                    max_ms
                } else {
                    delay as u64
                }
            }
        }
    }

    /// Delays for `retries` hops.
    pub fn delays(&self, retries: u32) -> Vec<u64> {
        (0..retries).map(|hop| self.delay_for_hop(hop)).collect()
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, BackoffPolicy::Fixed { .. })
    }

    fn validate(&self, topic: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPolicy {
            topic: topic.to_string(),
            reason: reason.to_string(),
        };
        match *self {
            BackoffPolicy::Fixed { delay_ms } => {
                if delay_ms > MAX_DURATION_MS {
                    return Err(invalid("delay_ms exceeds the millisecond timestamp range"));
                }
                Ok(())
            }
            BackoffPolicy::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                if initial_ms > MAX_DURATION_MS || max_ms > MAX_DURATION_MS {
                    return Err(invalid("delay exceeds the millisecond timestamp range"));
                }
                if !multiplier.is_finite() || multiplier < 1.0 {
                    return Err(invalid("multiplier must be finite and at least 1.0"));
                }
                if max_ms < initial_ms {
                    return Err(invalid("max_ms must not be below initial_ms"));
                }
                Ok(())
            }
        }
    }
}

/// How retry topic names are suffixed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicSuffixing {
    /// `-retry-0`, `-retry-1`, ...
    #[default]
    Index,
    /// `-retry-1000`, `-retry-2000`, ...; repeated delays get an index.
    Delay,
}

/// What happens at the end of the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DltStrategy {
    /// Dead-letter exhausted records; a DLT failure is logged and dropped.
    #[default]
    FailOnError,
    /// No dead-letter topic; exhausting the last retry hop ends the chain.
    NoDlt,
}

/// How failures are handled while a hop still has attempts left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopRetryMode {
    /// Every failed delivery goes through the recoverer, which republishes to
    /// the same hop until its attempts are spent.
    #[default]
    Republish,
    /// Retry in-process, without delay, up to the hop's attempts before
    /// handing the failure to the recoverer once.
    Local,
}

/// Partition choice when republishing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionAssignment {
    /// Let the broker partition by key.
    #[default]
    ByKey,
    /// Pin to the partition number the record was consumed from.
    SameAsSource,
}

/// Retry chain definition for one origin topic.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryTopicConfig {
    /// Origin (main) topic.
    pub topic: String,
    /// Number of retry hops between main and DLT.
    pub retries: u32,
    pub backoff: BackoffPolicy,
    pub suffixing: TopicSuffixing,
    pub retry_suffix: String,
    pub dlt_suffix: String,
    /// Explicit DLT name, overriding `{topic}{dlt_suffix}`.
    pub dlt_topic: Option<String>,
    pub dlt_strategy: DltStrategy,
    /// Attempts allowed on each hop before advancing.
    pub hop_attempts: u32,
    pub hop_retry: HopRetryMode,
    /// Collapse equal-delay retries into one reusable `-retry` topic.
    pub reuse_fixed_delay_topic: bool,
    /// Route to the DLT once this long has passed since the original record.
    pub timeout_ms: Option<u64>,
    /// Failure kinds that skip the remaining retries.
    pub not_retryable: Vec<String>,
    pub partition_assignment: PartitionAssignment,
}

impl Default for RetryTopicConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            retries: 3,
            backoff: BackoffPolicy::default(),
            suffixing: TopicSuffixing::default(),
            retry_suffix: DEFAULT_RETRY_SUFFIX.to_string(),
            dlt_suffix: DEFAULT_DLT_SUFFIX.to_string(),
            dlt_topic: None,
            dlt_strategy: DltStrategy::default(),
            hop_attempts: 1,
            hop_retry: HopRetryMode::default(),
            reuse_fixed_delay_topic: false,
            timeout_ms: None,
            not_retryable: Vec::new(),
            partition_assignment: PartitionAssignment::default(),
        }
    }
}

impl RetryTopicConfig {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    /// Fixed delay for every retry hop.
    pub fn fixed(topic: impl Into<String>, retries: u32, delay_ms: u64) -> Self {
        Self::new(topic)
            .with_retries(retries)
            .with_backoff(BackoffPolicy::Fixed { delay_ms })
    }

    /// Exponential delay capped at `max_ms`.
    pub fn exponential(
        topic: impl Into<String>,
        retries: u32,
        initial_ms: u64,
        multiplier: f64,
        max_ms: u64,
    ) -> Self {
        Self::new(topic)
            .with_retries(retries)
            .with_backoff(BackoffPolicy::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            })
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_suffixing(mut self, suffixing: TopicSuffixing) -> Self {
        self.suffixing = suffixing;
        self
    }

    pub fn with_suffixes(mut self, retry_suffix: impl Into<String>, dlt_suffix: impl Into<String>) -> Self {
        self.retry_suffix = retry_suffix.into();
        self.dlt_suffix = dlt_suffix.into();
        self
    }

    pub fn with_dlt_topic(mut self, dlt_topic: impl Into<String>) -> Self {
        self.dlt_topic = Some(dlt_topic.into());
        self
    }

    pub fn with_dlt_strategy(mut self, strategy: DltStrategy) -> Self {
        self.dlt_strategy = strategy;
        self
    }

    pub fn with_hop_attempts(mut self, attempts: u32, mode: HopRetryMode) -> Self {
        self.hop_attempts = attempts;
        self.hop_retry = mode;
        self
    }

    pub fn with_reused_retry_topic(mut self) -> Self {
        self.reuse_fixed_delay_topic = true;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_not_retryable(mut self, kind: impl Into<String>) -> Self {
        self.not_retryable.push(kind.into());
        self
    }

    pub fn with_partition_assignment(mut self, assignment: PartitionAssignment) -> Self {
        self.partition_assignment = assignment;
        self
    }

    /// Name of the dead-letter topic, if the strategy has one.
    pub fn dlt_topic_name(&self) -> Option<String> {
        match self.dlt_strategy {
            DltStrategy::NoDlt => None,
            DltStrategy::FailOnError => Some(
                self.dlt_topic
                    .clone()
                    .unwrap_or_else(|| format!("{}{}", self.topic, self.dlt_suffix)),
            ),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.hop_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts(self.topic.clone()));
        }
        if self.retries > 0 && self.retry_suffix.is_empty() {
            return Err(ConfigError::InvalidChain {
                origin: self.topic.clone(),
                reason: "retry suffix must not be empty".to_string(),
            });
        }
        if self.dlt_topic.is_none()
            && self.dlt_strategy == DltStrategy::FailOnError
            && self.dlt_suffix.is_empty()
        {
            return Err(ConfigError::InvalidChain {
                origin: self.topic.clone(),
                reason: "DLT suffix must not be empty".to_string(),
            });
        }
        self.backoff.validate(&self.topic)?;
        if self.timeout_ms.is_some_and(|t| t > MAX_DURATION_MS) {
            return Err(ConfigError::InvalidPolicy {
                topic: self.topic.clone(),
                reason: "timeout_ms exceeds the millisecond timestamp range".to_string(),
            });
        }

        let delays = self.backoff.delays(self.retries);
        if delays.windows(2).any(|w| w[1] < w[0]) {
            return Err(ConfigError::InvalidPolicy {
                topic: self.topic.clone(),
                reason: format!("delays must be non-decreasing, got {:?}", delays),
            });
        }
        Ok(())
    }
}
