//! Destination topic model.
//!
//! A `DestinationTopicChain` is the ordered list of concrete topics a record
//! can travel through for one origin topic:
//!
//! ```text
//! orders -> orders-retry-0 -> orders-retry-1 -> orders-retry-2 -> orders-dlt
//!  MAIN        RETRY              RETRY             RETRY           DLT
//! ```
//!
//! Chains are validated on construction and never mutated afterwards, so
//! they can be shared across consumer tasks behind an `Arc` without locking.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::config::{ConfigError, HopRetryMode, PartitionAssignment};

pub mod naming;

/// Role of a hop in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Main,
    Retry,
    Dlt,
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TopicKind::Main => "main",
            TopicKind::Retry => "retry",
            TopicKind::Dlt => "dlt",
        };
        f.write_str(s)
    }
}

/// One hop of a retry chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTopic {
    pub topic: String,
    pub kind: TopicKind,
    /// Delay before a record on this hop may be processed. Zero for main and DLT.
    pub delay_ms: u64,
    /// Attempts allowed on this hop before advancing.
    pub max_attempts: u32,
    /// Suffix appended to the origin topic name (empty for main).
    pub suffix: String,
}

impl DestinationTopic {
    pub fn main(topic: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            topic: topic.into(),
            kind: TopicKind::Main,
            delay_ms: 0,
            max_attempts,
            suffix: String::new(),
        }
    }

    pub fn retry(
        topic: impl Into<String>,
        suffix: impl Into<String>,
        delay_ms: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            topic: topic.into(),
            kind: TopicKind::Retry,
            delay_ms,
            max_attempts,
            suffix: suffix.into(),
        }
    }

    pub fn dlt(topic: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: TopicKind::Dlt,
            delay_ms: 0,
            max_attempts: 1,
            suffix: suffix.into(),
        }
    }

    pub fn is_main(&self) -> bool {
        self.kind == TopicKind::Main
    }

    pub fn is_retry(&self) -> bool {
        self.kind == TopicKind::Retry
    }

    pub fn is_dlt(&self) -> bool {
        self.kind == TopicKind::Dlt
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Chain-wide behavior that applies to every hop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainPolicy {
    /// Dead-letter once this long has passed since the original record.
    pub timeout_ms: Option<u64>,
    /// Failure kinds that skip straight to the DLT.
    pub not_retryable: Vec<String>,
    pub partition_assignment: PartitionAssignment,
    pub hop_retry: HopRetryMode,
}

impl ChainPolicy {
    pub fn is_not_retryable(&self, kind: &str) -> bool {
        self.not_retryable.iter().any(|k| k == kind)
    }
}

/// Ordered, immutable hops for one origin topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationTopicChain {
    origin: String,
    hops: Vec<DestinationTopic>,
    policy: ChainPolicy,
}

impl DestinationTopicChain {
    /// Build a chain, enforcing its structural invariants.
    ///
    /// - the first hop is the only MAIN hop and is named after the origin
    /// - a DLT hop, if present, is last
    /// - retry delays never decrease
    /// - topic names are unique and every hop allows at least one attempt
    pub fn new(
        origin: impl Into<String>,
        hops: Vec<DestinationTopic>,
        policy: ChainPolicy,
    ) -> Result<Self, ConfigError> {
        let origin = origin.into();
        let invalid = |reason: String| ConfigError::InvalidChain {
            origin: origin.clone(),
            reason,
        };

        match hops.first() {
            Some(first) if first.is_main() && first.topic == origin => {}
            Some(first) => {
                return Err(invalid(format!(
                    "first hop must be the main topic, found '{}' ({})",
                    first.topic, first.kind
                )))
            }
            None => return Err(invalid("chain has no hops".to_string())),
        }

        let last = hops.len() - 1;
        let mut names = HashSet::new();
        let mut previous_delay = 0;
        for (idx, hop) in hops.iter().enumerate() {
            if hop.topic.is_empty() {
                return Err(ConfigError::EmptyTopic);
            }
            if !names.insert(hop.topic.as_str()) {
                return Err(invalid(format!("duplicate topic '{}'", hop.topic)));
            }
            if hop.max_attempts == 0 {
                return Err(ConfigError::InvalidMaxAttempts(hop.topic.clone()));
            }
            match hop.kind {
                TopicKind::Main if idx != 0 => {
                    return Err(invalid(format!("second main topic '{}'", hop.topic)));
                }
                TopicKind::Dlt if idx != last => {
                    return Err(invalid(format!("DLT '{}' is not the last hop", hop.topic)));
                }
                TopicKind::Retry => {
                    if hop.delay_ms < previous_delay {
                        return Err(invalid(format!(
                            "retry delay {}ms on '{}' is shorter than the previous {}ms",
                            hop.delay_ms, hop.topic, previous_delay
                        )));
                    }
                    previous_delay = hop.delay_ms;
                }
                _ => {}
            }
        }

        Ok(Self {
            origin,
            hops,
            policy,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn hops(&self) -> &[DestinationTopic] {
        &self.hops
    }

    pub fn policy(&self) -> &ChainPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// Index of `topic` in the chain.
    pub fn position(&self, topic: &str) -> Option<usize> {
        self.hops.iter().position(|hop| hop.topic == topic)
    }

    pub fn get(&self, idx: usize) -> Option<&DestinationTopic> {
        self.hops.get(idx)
    }

    pub fn main(&self) -> &DestinationTopic {
        &self.hops[0]
    }

    pub fn dlt(&self) -> Option<&DestinationTopic> {
        self.hops.last().filter(|hop| hop.is_dlt())
    }

    pub fn retry_hops(&self) -> impl Iterator<Item = &DestinationTopic> {
        self.hops.iter().filter(|hop| hop.is_retry())
    }

    pub fn topic_names(&self) -> Vec<&str> {
        self.hops.iter().map(|hop| hop.topic.as_str()).collect()
    }
}

impl fmt::Display for DestinationTopicChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic_names().join(" -> "))
    }
}
