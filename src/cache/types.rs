//! Core type definitions for the cache system

use crate::http::{InterceptedRequest, Method};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Identifies a cached entry: the normalized method and URL of a read request
///
/// The fragment is dropped during normalization since it never reaches the
/// network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    method: Method,
    url: String,
}

impl CacheKey {
    /// Derive a key from a request. Returns `None` for non-read methods,
    /// which are never used as keys.
    pub fn from_request(request: &InterceptedRequest) -> Option<Self> {
        Self::new(request.method.clone(), &request.url)
    }

    pub fn new(method: Method, url: &Url) -> Option<Self> {
        if !method.is_read() {
            return None;
        }
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        Some(Self {
            method,
            url: normalized.to_string(),
        })
    }

    /// GET key for an already-resolved URL
    pub fn get(url: &Url) -> Self {
        let mut normalized = url.clone();
        normalized.set_fragment(None);
        Self {
            method: Method::Get,
            url: normalized.to_string(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Counters describing cache and revalidation activity
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry
    pub hits: u64,

    /// Lookups that found nothing (or failed and were treated as a miss)
    pub misses: u64,

    /// Network fetches that produced a response
    pub network_successes: u64,

    /// Network fetches that failed or timed out
    pub network_failures: u64,

    /// Entries written
    pub writes: u64,

    /// Writes that failed and were dropped
    pub failed_writes: u64,

    /// Partitions removed by garbage collection or eviction
    pub partitions_deleted: u64,

    /// Background write-back tasks spawned
    pub background_tasks: u64,

    /// Settled cycles by outcome
    pub outcomes: OutcomeCounts,
}

/// Per-outcome tally of settled revalidation cycles
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub cache_only: u64,
    pub network_only: u64,
    pub both: u64,
    pub neither: u64,
}

impl OutcomeCounts {
    pub fn total(&self) -> u64 {
        self.cache_only + self.network_only + self.both + self.neither
    }
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate network failure rate as a percentage
    pub fn network_failure_rate(&self) -> f64 {
        let total = self.network_successes + self.network_failures;
        if total == 0 {
            0.0
        } else {
            (self.network_failures as f64 / total as f64) * 100.0
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, ",
            self.hits,
            self.misses,
            self.hit_rate()
        )?;
        write!(
            f,
            "writes: {}, failed_writes: {}, network_failures: {}, partitions_deleted: {} }}",
            self.writes, self.failed_writes, self.network_failures, self.partitions_deleted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_from_read_request() {
        let request = InterceptedRequest::get("https://app.example.com/data.json#top").unwrap();
        let key = CacheKey::from_request(&request).unwrap();

        assert_eq!(key.method(), &Method::Get);
        assert_eq!(key.url(), "https://app.example.com/data.json");
        assert_eq!(key.to_string(), "GET https://app.example.com/data.json");
    }

    #[test]
    fn test_no_key_for_write_request() {
        let url = Url::parse("https://app.example.com/data.json").unwrap();
        let request = InterceptedRequest::new(Method::Post, url);
        assert!(CacheKey::from_request(&request).is_none());
    }

    #[test]
    fn test_key_distinguishes_query() {
        let a = CacheKey::get(&Url::parse("https://x.test/a?page=1").unwrap());
        let b = CacheKey::get(&Url::parse("https://x.test/a?page=2").unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            writes: 40,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("writes: 40"));
    }
}
