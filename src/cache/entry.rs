//! Cache entries: a stored response plus bookkeeping metadata

use crate::cache::types::CacheKey;
use crate::http::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A stored response associated with one key inside one partition
///
/// Entries are immutable once stored; an update replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached response (status, headers, body)
    pub response: Response,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(key: CacheKey, response: Response) -> Self {
        let mut entry = Self {
            key,
            response,
            metadata: CacheMetadata {
                stored_at: Utc::now(),
                size_bytes: 0,
            },
        };
        entry.metadata.size_bytes = entry.calculate_size();
        entry
    }

    /// Approximate size: key + body + headers
    pub fn calculate_size(&self) -> usize {
        let headers: usize = self
            .response
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        self.key.url().len() + self.response.body.len() + headers
    }

    /// Time since the entry was stored
    pub fn age(&self) -> Duration {
        (Utc::now() - self.metadata.stored_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }

    /// True when both entries carry the same response, ignoring metadata
    pub fn same_content(&self, other: &CacheEntry) -> bool {
        self.key == other.key && self.response == other.response
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the entry was written
    pub stored_at: DateTime<Utc>,

    /// Size of the entry in bytes
    pub size_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use url::Url;

    fn key() -> CacheKey {
        CacheKey::get(&Url::parse("https://app.example.com/data.json").unwrap())
    }

    #[test]
    fn test_cache_entry_creation() {
        let entry = CacheEntry::new(key(), Response::ok(r#"{"x":1}"#));

        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.text(), r#"{"x":1}"#);
        assert_eq!(entry.metadata.size_bytes, entry.calculate_size());
    }

    #[test]
    fn test_calculate_size() {
        let entry = CacheEntry::new(
            key(),
            Response::ok("value").with_header("content-type", "text/plain"),
        );

        let size = entry.calculate_size();
        assert!(size >= "value".len() + "content-type".len() + "text/plain".len());
    }

    #[test]
    fn test_same_content_ignores_timestamp() {
        let a = CacheEntry::new(key(), Response::ok("body"));
        sleep(Duration::from_millis(5));
        let b = CacheEntry::new(key(), Response::ok("body"));

        assert!(a.same_content(&b));
        assert!(!a.same_content(&CacheEntry::new(key(), Response::ok("other"))));
    }

    #[test]
    fn test_age() {
        let entry = CacheEntry::new(key(), Response::ok("value"));
        sleep(Duration::from_millis(10));
        assert!(entry.age() >= Duration::from_millis(10));
    }
}
