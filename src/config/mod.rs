//! Application configuration.
//!
//! Aggregates the retry-topic, backoff, publish-retry, container and Kafka
//! settings into a single `Config` that can be loaded from YAML files or
//! environment variables.

mod kafka;
mod retry_topic;
mod runtime;

pub use kafka::KafkaConfig;
pub use retry_topic::{
    BackoffPolicy, DltStrategy, HopRetryMode, PartitionAssignment, RetryTopicConfig,
    TopicSuffixing, DEFAULT_DLT_SUFFIX, DEFAULT_RETRY_SUFFIX, MAX_DURATION_MS,
};
pub use runtime::{BackoffManagerConfig, ContainerConfig, PublishRetryConfig, ResumeStrategy};

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RETRYTOPIC_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RETRYTOPIC";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RETRYTOPIC_LOG";

/// Configuration errors. Always fatal at setup, never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Failed to read config file '{0}': {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Topic name must not be empty")]
    EmptyTopic,

    #[error("Invalid backoff policy for '{topic}': {reason}")]
    InvalidPolicy { topic: String, reason: String },

    #[error("Max attempts must be at least 1 for '{0}'")]
    InvalidMaxAttempts(String),

    #[error("Invalid destination chain for '{origin}': {reason}")]
    InvalidChain { origin: String, reason: String },

    #[error("Topic '{topic}' already belongs to the chain for '{owner}'")]
    TopicConflict { topic: String, owner: String },
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Retry chains, one per origin topic.
    pub retry_topics: Vec<RetryTopicConfig>,
    /// Backoff manager resume behavior.
    pub backoff_manager: BackoffManagerConfig,
    /// Bounded retry for recovery publishes.
    pub publish_retry: PublishRetryConfig,
    /// Listener container poll loop.
    pub container: ContainerConfig,
    /// Kafka connection (used with the `kafka` feature).
    pub kafka: KafkaConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single YAML file, without the default
    /// file or environment overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every retry topic definition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry_topics.iter().try_for_each(RetryTopicConfig::validate)
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    const YAML: &str = r#"
retry_topics:
  - topic: orders
    retries: 3
    backoff:
      type: fixed
      delay_ms: 1000
  - topic: payments
    retries: 4
    suffixing: delay
    backoff:
      type: exponential
      initial_ms: 1000
      multiplier: 2.0
      max_ms: 4000
    not_retryable: ["DeserializationError"]
backoff_manager:
  resume: sweep
  sweep_interval_ms: 250
publish_retry:
  max_retries: 5
"#;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.retry_topics.is_empty());
        assert_eq!(config.backoff_manager.resume, ResumeStrategy::Timer);
        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
    }

    #[test]
    fn test_config_from_yaml() {
        let config = Config::from_yaml(YAML).unwrap();

        assert_eq!(config.retry_topics.len(), 2);
        assert_eq!(
            config.retry_topics[0].backoff,
            BackoffPolicy::Fixed { delay_ms: 1000 }
        );
        assert_eq!(config.retry_topics[1].suffixing, TopicSuffixing::Delay);
        assert_eq!(
            config.retry_topics[1].not_retryable,
            vec!["DeserializationError".to_string()]
        );
        assert_eq!(config.backoff_manager.resume, ResumeStrategy::Sweep);
        assert_eq!(config.backoff_manager.sweep_interval_ms, 250);
        assert_eq!(config.publish_retry.max_retries, 5);
    }

    #[test]
    #[serial]
    fn test_config_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = Config::load(file.path().to_str()).unwrap();

        assert_eq!(config.retry_topics[0].topic, "orders");
        assert_eq!(config.retry_topics[1].retries, 4);
    }

    #[test]
    #[serial]
    fn test_config_load_rejects_invalid_policy() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(
            br#"
retry_topics:
  - topic: orders
    backoff:
      type: exponential
      initial_ms: 1000
      multiplier: 0.5
      max_ms: 4000
"#,
        )
        .unwrap();

        let result = Config::load(file.path().to_str());

        assert!(matches!(result, Err(ConfigError::InvalidPolicy { .. })));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.retry_topics.len(), 2);
        assert_eq!(config.backoff_manager.resume, ResumeStrategy::Sweep);
    }

    #[test]
    fn test_config_from_file_missing() {
        let result = Config::from_file("/nonexistent/retrytopic.yaml");
        assert!(matches!(result, Err(ConfigError::FileRead(..))));
    }

    #[test]
    fn test_config_from_yaml_rejects_malformed_and_invalid() {
        assert!(matches!(
            Config::from_yaml("retry_topics: [unterminated"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_yaml("retry_topics:\n  - topic: \"\"\n"),
            Err(ConfigError::EmptyTopic)
        ));
    }
}
