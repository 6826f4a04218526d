//! Chain construction from a `RetryTopicConfig`.

use tracing::debug;

use crate::config::{ConfigError, RetryTopicConfig};
use crate::topic::naming::{retry_suffixes, topic_name};
use crate::topic::{ChainPolicy, DestinationTopic, DestinationTopicChain};

/// Build the destination chain for one origin topic.
///
/// Deterministic: the same config always yields the same topic names,
/// delays and attempt limits.
pub fn build_chain(config: &RetryTopicConfig) -> Result<DestinationTopicChain, ConfigError> {
    config.validate()?;
    let origin = config.topic.as_str();

    let mut hops = vec![DestinationTopic::main(origin, config.hop_attempts)];

    if config.reuse_fixed_delay_topic && config.retries > 0 {
        if !config.backoff.is_fixed() {
            return Err(ConfigError::InvalidChain {
                origin: origin.to_string(),
                reason: "retry topic reuse requires a fixed backoff".to_string(),
            });
        }
        let delay_ms = config.backoff.delay_for_hop(0);
        hops.push(DestinationTopic::retry(
            topic_name(origin, &config.retry_suffix),
            config.retry_suffix.clone(),
            delay_ms,
            config.retries,
        ));
    } else {
        let delays = config.backoff.delays(config.retries);
        let suffixes = retry_suffixes(&config.retry_suffix, config.suffixing, &delays);
        for (suffix, delay_ms) in suffixes.into_iter().zip(delays) {
            hops.push(DestinationTopic::retry(
                topic_name(origin, &suffix),
                suffix,
                delay_ms,
                config.hop_attempts,
            ));
        }
    }

    if let Some(dlt) = config.dlt_topic_name() {
        let suffix = dlt.strip_prefix(origin).unwrap_or_default().to_string();
        hops.push(DestinationTopic::dlt(dlt, suffix));
    }

    let policy = ChainPolicy {
        timeout_ms: config.timeout_ms,
        not_retryable: config.not_retryable.clone(),
        partition_assignment: config.partition_assignment,
        hop_retry: config.hop_retry,
    };

    let chain = DestinationTopicChain::new(origin, hops, policy)?;
    debug!(origin = %origin, chain = %chain, "Built retry chain");
    Ok(chain)
}
