//! Destination topic resolution.
//!
//! The resolver answers two questions for the recoverer and the retry
//! listener:
//! - where does a failed record go next, given its origin, current hop and
//!   attempts on that hop
//! - what are the delay and kind of a given concrete topic
//!
//! Chains are registered once at startup through `DestinationTopicRegistry`.
//! The registry is then frozen into a `DefaultDestinationTopicResolver`,
//! which is read-only and shared across consumer tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ConfigError;
use crate::topic::{DestinationTopic, DestinationTopicChain};

/// Result type for resolver operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Resolution errors. Each one indicates a configuration mistake, not a
/// condition worth retrying.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    #[error("No retry chain registered for origin topic '{0}'")]
    UnknownChain(String),

    #[error("Topic '{topic}' is not part of the chain for '{origin}'")]
    TopicNotInChain { origin: String, topic: String },

    #[error("Topic '{0}' does not belong to any retry chain")]
    UnknownTopic(String),
}

/// Where a failed record goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextDestination {
    Topic(DestinationTopic),
    /// No further hop: the record is on the DLT, or the chain has no DLT and
    /// the last retry hop is spent.
    Exhausted,
}

/// Chain lookup and cross-hop advancement.
pub trait DestinationTopicResolver: Send + Sync {
    /// Next hop for a record that failed on `current`.
    ///
    /// `attempts` counts failed deliveries on `current`. While it is below the
    /// hop's `max_attempts` the record stays on `current`; otherwise it moves
    /// one hop forward.
    fn resolve_next_destination(
        &self,
        origin: &str,
        current: &str,
        attempts: u32,
    ) -> Result<NextDestination>;

    /// Hop metadata for a concrete topic.
    fn destination_for(&self, topic: &str) -> Result<DestinationTopic>;

    /// Chain registered for an origin topic.
    fn chain(&self, origin: &str) -> Result<Arc<DestinationTopicChain>>;

    /// Chain that contains `topic` as any of its hops.
    fn chain_for_topic(&self, topic: &str) -> Result<Arc<DestinationTopicChain>>;

    /// DLT for a record that must skip its remaining retries.
    fn dead_letter_destination(&self, origin: &str, current: &str) -> Result<NextDestination> {
        let chain = self.chain(origin)?;
        let hop = chain
            .position(current)
            .and_then(|idx| chain.get(idx))
            .ok_or_else(|| ResolverError::TopicNotInChain {
                origin: origin.to_string(),
                topic: current.to_string(),
            })?;
        if hop.is_dlt() {
            return Ok(NextDestination::Exhausted);
        }
        Ok(chain
            .dlt()
            .cloned()
            .map(NextDestination::Topic)
            .unwrap_or(NextDestination::Exhausted))
    }
}

/// Mutable registration stage for chains.
///
/// The first chain registered for an origin wins; later registrations of the
/// same origin are no-ops. A hop name already owned by another origin is a
/// conflict.
#[derive(Debug, Default)]
pub struct DestinationTopicRegistry {
    chains: HashMap<String, Arc<DestinationTopicChain>>,
    topics: HashMap<String, (String, usize)>,
}

impl DestinationTopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a chain. Returns `false` when the origin was already registered.
    pub fn register(&mut self, chain: DestinationTopicChain) -> std::result::Result<bool, ConfigError> {
        if self.chains.contains_key(chain.origin()) {
            debug!(origin = %chain.origin(), "Retry chain already registered, keeping first");
            return Ok(false);
        }

        if let Some((topic, owner)) = chain
            .hops()
            .iter()
            .find_map(|hop| self.topics.get(&hop.topic).map(|(owner, _)| (hop.topic.clone(), owner.clone())))
        {
            return Err(ConfigError::TopicConflict { topic, owner });
        }

        for (idx, hop) in chain.hops().iter().enumerate() {
            self.topics
                .insert(hop.topic.clone(), (chain.origin().to_string(), idx));
        }
        info!(origin = %chain.origin(), chain = %chain, "Registered retry chain");
        self.chains
            .insert(chain.origin().to_string(), Arc::new(chain));
        Ok(true)
    }

    pub fn contains(&self, origin: &str) -> bool {
        self.chains.contains_key(origin)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Freeze the registry into a resolver.
    pub fn build(self) -> DefaultDestinationTopicResolver {
        DefaultDestinationTopicResolver {
            chains: self.chains,
            topics: self.topics,
        }
    }
}

/// Read-only resolver over registered chains.
#[derive(Debug, Default)]
pub struct DefaultDestinationTopicResolver {
    chains: HashMap<String, Arc<DestinationTopicChain>>,
    /// Concrete topic -> (origin, hop index).
    topics: HashMap<String, (String, usize)>,
}

impl DefaultDestinationTopicResolver {
    /// Register chains and freeze in one step.
    pub fn from_chains(
        chains: impl IntoIterator<Item = DestinationTopicChain>,
    ) -> std::result::Result<Self, ConfigError> {
        let mut registry = DestinationTopicRegistry::new();
        for chain in chains {
            registry.register(chain)?;
        }
        Ok(registry.build())
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    /// Every concrete topic across all chains.
    pub fn all_topics(&self) -> impl Iterator<Item = &str> {
        self.topics.keys().map(String::as_str)
    }
}

impl DestinationTopicResolver for DefaultDestinationTopicResolver {
    fn resolve_next_destination(
        &self,
        origin: &str,
        current: &str,
        attempts: u32,
    ) -> Result<NextDestination> {
        let chain = self.chain(origin)?;
        let idx = chain
            .position(current)
            .ok_or_else(|| ResolverError::TopicNotInChain {
                origin: origin.to_string(),
                topic: current.to_string(),
            })?;
        let hop = &chain.hops()[idx];

        if hop.is_dlt() {
            return Ok(NextDestination::Exhausted);
        }
        if attempts < hop.max_attempts {
            return Ok(NextDestination::Topic(hop.clone()));
        }
        Ok(chain
            .get(idx + 1)
            .cloned()
            .map(NextDestination::Topic)
            .unwrap_or(NextDestination::Exhausted))
    }

    fn destination_for(&self, topic: &str) -> Result<DestinationTopic> {
        let (origin, idx) = self
            .topics
            .get(topic)
            .ok_or_else(|| ResolverError::UnknownTopic(topic.to_string()))?;
        self.chains
            .get(origin)
            .and_then(|chain| chain.get(*idx))
            .cloned()
            .ok_or_else(|| ResolverError::UnknownTopic(topic.to_string()))
    }

    fn chain(&self, origin: &str) -> Result<Arc<DestinationTopicChain>> {
        self.chains
            .get(origin)
            .cloned()
            .ok_or_else(|| ResolverError::UnknownChain(origin.to_string()))
    }

    fn chain_for_topic(&self, topic: &str) -> Result<Arc<DestinationTopicChain>> {
        let (origin, _) = self
            .topics
            .get(topic)
            .ok_or_else(|| ResolverError::UnknownTopic(topic.to_string()))?;
        self.chain(origin)
    }
}
