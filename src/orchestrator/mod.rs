//! Retry orchestration.
//!
//! Composes the resolver, backoff manager and recoverer per origin topic:
//!
//! 1. `RetryTopicBootstrapper` collects `RetryTopicConfig`s, builds a chain
//!    for each (first registration of an origin wins) and accepts optional
//!    replacements for the default resolver and recoverer.
//! 2. `bootstrap()` freezes everything into a `RetryTopicOrchestrator`,
//!    which owns the shared components.
//! 3. `attach_error_handling()` wraps a listener endpoint in a
//!    `RetryTopicListener` covering every hop of its chain.
//!
//! ```ignore
//! let mut bootstrapper = RetryTopicBootstrapper::new(publisher);
//! bootstrapper.register(&RetryTopicConfig::fixed("orders", 3, 1000))?;
//! let orchestrator = bootstrapper.bootstrap();
//! let listener = orchestrator.attach_error_handling(endpoint, "orders")?;
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backoff::ConsumerBackoffManager;
use crate::bus::{PartitionController, RecordPublisher};
use crate::clock::{Clock, SystemClock};
use crate::config::{
    BackoffManagerConfig, Config, ConfigError, ContainerConfig, PublishRetryConfig, ResumeStrategy,
    RetryTopicConfig,
};
use crate::container::{ListenerContainer, RecordSource};
use crate::recoverer::{DeadLetterPublishingRecoverer, Recoverer};
use crate::resolver::{DestinationTopicRegistry, DestinationTopicResolver, ResolverError};
use crate::topic::DestinationTopicChain;

mod chain;
mod handler;

pub use chain::build_chain;
pub use handler::{Disposition, HandleError, ListenerEndpoint, RetryTopicListener};

/// Collects chain registrations and component overrides.
pub struct RetryTopicBootstrapper {
    publisher: Arc<dyn RecordPublisher>,
    clock: Arc<dyn Clock>,
    backoff_config: BackoffManagerConfig,
    publish_retry: PublishRetryConfig,
    container: ContainerConfig,
    registry: DestinationTopicRegistry,
    resolver: Option<Arc<dyn DestinationTopicResolver>>,
    recoverer: Option<Arc<dyn Recoverer>>,
}

impl RetryTopicBootstrapper {
    pub fn new(publisher: Arc<dyn RecordPublisher>) -> Self {
        Self {
            publisher,
            clock: Arc::new(SystemClock),
            backoff_config: BackoffManagerConfig::default(),
            publish_retry: PublishRetryConfig::default(),
            container: ContainerConfig::default(),
            registry: DestinationTopicRegistry::new(),
            resolver: None,
            recoverer: None,
        }
    }

    /// Bootstrapper with every retry topic and runtime knob from `config`.
    pub fn from_config(publisher: Arc<dyn RecordPublisher>, config: &Config) -> Result<Self, ConfigError> {
        let mut bootstrapper = Self::new(publisher)
            .with_backoff_config(config.backoff_manager.clone())
            .with_publish_retry(config.publish_retry.clone())
            .with_container_config(config.container.clone());
        for retry_topic in &config.retry_topics {
            bootstrapper.register(retry_topic)?;
        }
        Ok(bootstrapper)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff_config(mut self, config: BackoffManagerConfig) -> Self {
        self.backoff_config = config;
        self
    }

    pub fn with_publish_retry(mut self, config: PublishRetryConfig) -> Self {
        self.publish_retry = config;
        self
    }

    /// Poll loop settings for containers built by the orchestrator.
    pub fn with_container_config(mut self, config: ContainerConfig) -> Self {
        self.container = config;
        self
    }

    /// Replace the default resolver. Registered chains are then ignored.
    pub fn with_resolver(mut self, resolver: Arc<dyn DestinationTopicResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Replace the default recoverer.
    pub fn with_recoverer(mut self, recoverer: Arc<dyn Recoverer>) -> Self {
        self.recoverer = Some(recoverer);
        self
    }

    /// Build and register the chain for `config`.
    ///
    /// Returns `false` if the origin topic was already registered; the first
    /// registration is kept.
    pub fn register(&mut self, config: &RetryTopicConfig) -> Result<bool, ConfigError> {
        let chain = build_chain(config)?;
        self.registry.register(chain)
    }

    pub fn bootstrap(self) -> RetryTopicOrchestrator {
        let chains = self.registry.len();
        let resolver: Arc<dyn DestinationTopicResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(self.registry.build()),
        };
        let recoverer: Arc<dyn Recoverer> = match self.recoverer {
            Some(recoverer) => recoverer,
            None => Arc::new(
                DeadLetterPublishingRecoverer::new(
                    Arc::clone(&resolver),
                    Arc::clone(&self.publisher),
                    Arc::clone(&self.clock),
                )
                .with_publish_retry(self.publish_retry),
            ),
        };
        let backoff = ConsumerBackoffManager::new(Arc::clone(&self.clock), &self.backoff_config);

        info!(
            chains,
            resume = ?self.backoff_config.resume,
            "Retry topic orchestrator ready"
        );

        RetryTopicOrchestrator {
            resolver,
            backoff,
            recoverer,
            clock: self.clock,
            backoff_config: self.backoff_config,
            container: self.container,
        }
    }
}

/// Owns the shared retry-topic components for the life of the process.
pub struct RetryTopicOrchestrator {
    resolver: Arc<dyn DestinationTopicResolver>,
    backoff: ConsumerBackoffManager,
    recoverer: Arc<dyn Recoverer>,
    clock: Arc<dyn Clock>,
    backoff_config: BackoffManagerConfig,
    container: ContainerConfig,
}

impl RetryTopicOrchestrator {
    pub fn resolver(&self) -> &Arc<dyn DestinationTopicResolver> {
        &self.resolver
    }

    pub fn backoff_manager(&self) -> &ConsumerBackoffManager {
        &self.backoff
    }

    pub fn recoverer(&self) -> &Arc<dyn Recoverer> {
        &self.recoverer
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn container_config(&self) -> &ContainerConfig {
        &self.container
    }

    pub fn chain(&self, origin: &str) -> Result<Arc<DestinationTopicChain>, ResolverError> {
        self.resolver.chain(origin)
    }

    /// Wrap `endpoint` in error handling for the chain registered for `origin`.
    pub fn attach_error_handling(
        &self,
        endpoint: ListenerEndpoint,
        origin: &str,
    ) -> Result<RetryTopicListener, ResolverError> {
        let chain = self.resolver.chain(origin)?;
        info!(
            listener = %endpoint.id,
            origin = %origin,
            topics = %chain,
            "Attached retry topic error handling"
        );
        Ok(RetryTopicListener::new(
            endpoint,
            chain,
            Arc::clone(&self.resolver),
            self.backoff.clone(),
            Arc::clone(&self.recoverer),
        ))
    }

    /// Container running `listener` with the configured poll loop settings.
    pub fn container(
        &self,
        source: Arc<dyn RecordSource>,
        controller: Arc<dyn PartitionController>,
        listener: Arc<RetryTopicListener>,
    ) -> ListenerContainer {
        ListenerContainer::new(source, controller, listener).with_config(self.container.clone())
    }

    /// Start the backoff sweeper when the resume strategy is `sweep`.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        match self.backoff_config.resume {
            ResumeStrategy::Sweep => Some(
                self.backoff
                    .spawn_sweeper(self.backoff_config.sweep_interval(), shutdown),
            ),
            ResumeStrategy::Timer => None,
        }
    }
}
