//! Deterministic retry topic names.
//!
//! Names depend only on the origin topic, suffix settings and delay list, so
//! deriving the chain again after a restart yields the same topics.

use std::collections::HashMap;

use crate::config::TopicSuffixing;

/// Suffixes for each retry hop, in hop order.
///
/// `Index` numbers hops from zero. `Delay` uses the hop's delay in
/// milliseconds; a delay that occurs more than once gets an occurrence
/// index on every occurrence so names stay unique.
pub fn retry_suffixes(retry_suffix: &str, suffixing: TopicSuffixing, delays: &[u64]) -> Vec<String> {
    match suffixing {
        TopicSuffixing::Index => (0..delays.len())
            .map(|idx| format!("{}-{}", retry_suffix, idx))
            .collect(),
        TopicSuffixing::Delay => {
            let mut totals: HashMap<u64, usize> = HashMap::new();
            for delay in delays {
                *totals.entry(*delay).or_insert(0) += 1;
            }
            let mut seen: HashMap<u64, usize> = HashMap::new();
            delays
                .iter()
                .map(|delay| {
                    if totals.get(delay).copied().unwrap_or(0) > 1 {
                        let occurrence = seen.entry(*delay).or_insert(0);
                        let suffix = format!("{}-{}-{}", retry_suffix, delay, occurrence);
                        *occurrence += 1;
                        suffix
                    } else {
                        format!("{}-{}", retry_suffix, delay)
                    }
                })
                .collect()
        }
    }
}

/// `origin` followed by `suffix`.
pub fn topic_name(origin: &str, suffix: &str) -> String {
    format!("{}{}", origin, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_suffixes() {
        assert_eq!(
            retry_suffixes("-retry", TopicSuffixing::Index, &[1000, 1000, 1000]),
            vec!["-retry-0", "-retry-1", "-retry-2"]
        );
    }

    #[test]
    fn test_delay_suffixes_unique_delays() {
        assert_eq!(
            retry_suffixes("-retry", TopicSuffixing::Delay, &[1000, 2000, 4000]),
            vec!["-retry-1000", "-retry-2000", "-retry-4000"]
        );
    }

    #[test]
    fn test_delay_suffixes_repeated_delay_gets_index() {
        assert_eq!(
            retry_suffixes("-retry", TopicSuffixing::Delay, &[1000, 2000, 4000, 4000]),
            vec!["-retry-1000", "-retry-2000", "-retry-4000-0", "-retry-4000-1"]
        );
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(topic_name("orders", "-retry-0"), "orders-retry-0");
    }
}
