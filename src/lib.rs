//! Retrytopic - non-blocking retry topics
//!
//! A failed record is republished to a chain of delayed retry topics and
//! finally a dead-letter topic, so the main partition keeps flowing while
//! the failure waits out its backoff.
//!
//! - `topic` / `resolver`: destination chains and next-hop resolution
//! - `backoff`: pause a partition until its head record is due
//! - `recoverer`: republish a failed record with retry headers
//! - `orchestrator` / `container`: wire it all around a record listener

pub mod backoff;
pub mod bus;
pub mod clock;
pub mod config;
pub mod container;
pub mod listener;
pub mod orchestrator;
pub mod recoverer;
pub mod resolver;
pub mod topic;
pub mod utils;

pub use backoff::{BackoffDecision, ConsumerBackoffManager};
pub use bus::{ConsumerRecord, PartitionController, ProducerRecord, RecordPublisher, TopicPartition};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, ConfigError, RetryTopicConfig};
pub use container::{ListenerContainer, RecordSource};
pub use listener::{FnListener, ListenerError, RecordListener};
pub use orchestrator::{Disposition, ListenerEndpoint, RetryTopicBootstrapper, RetryTopicOrchestrator};
pub use recoverer::{DeadLetterPublishingRecoverer, Recoverer, RecoveryOutcome};
pub use resolver::{DefaultDestinationTopicResolver, DestinationTopicResolver, NextDestination};
pub use topic::{DestinationTopic, DestinationTopicChain, TopicKind};
