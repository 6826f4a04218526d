//! Record headers and the retry-topic header names.
//!
//! Headers are the only state that travels between hops. Numeric values are
//! stored as UTF-8 decimal strings so they stay readable in broker tooling.

/// Total failed attempts across the whole chain.
pub const ATTEMPTS: &str = "retry-topic-attempts";
/// Failed attempts on the hop the record currently sits on.
pub const HOP_ATTEMPTS: &str = "retry-topic-hop-attempts";
/// Epoch millis at or after which the record may be processed.
pub const BACKOFF_DUE: &str = "retry-topic-backoff-due";
/// Timestamp of the record as first seen on the main topic.
pub const ORIGINAL_TIMESTAMP: &str = "retry-topic-original-timestamp";
/// Logical origin topic of the chain.
pub const ORIGIN_TOPIC: &str = "retry-topic-origin-topic";
pub const ORIGINAL_PARTITION: &str = "retry-topic-original-partition";
pub const ORIGINAL_OFFSET: &str = "retry-topic-original-offset";
/// Kind of the most recent listener failure.
pub const EXCEPTION_TYPE: &str = "retry-topic-exception-type";
pub const EXCEPTION_MESSAGE: &str = "retry-topic-exception-message";
/// Set on records published to the dead-letter topic.
pub const DEAD_LETTER: &str = "retry-topic-dlt";

/// Ordered record headers.
///
/// Lookups return the last value for a key, matching broker semantics where
/// later headers shadow earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, Vec<u8>)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// Parse a decimal header. Malformed values read as absent.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.iter().any(|(k, _)| k == key)
    }

    /// Set a header, replacing every existing value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        let key = key.into();
        self.0.retain(|(k, _)| *k != key);
        self.0.push((key, value.into()));
    }

    pub fn insert_str(&mut self, key: impl Into<String>, value: &str) {
        self.insert(key, value.as_bytes().to_vec());
    }

    pub fn insert_i64(&mut self, key: impl Into<String>, value: i64) {
        self.insert(key, value.to_string().into_bytes());
    }

    /// Set a header only if it is absent.
    pub fn insert_if_absent(&mut self, key: &str, value: impl Into<Vec<u8>>) {
        if !self.contains(key) {
            self.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.0.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<u8>)> for Headers {
    fn from_iter<I: IntoIterator<Item = (String, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
