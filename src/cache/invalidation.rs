//! Partition invalidation
//!
//! Stale data is purged a whole partition at a time: on activation every
//! partition outside the designated set is deleted. There is no per-entry
//! freshness tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Reason a partition (or entry) was removed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Belongs to a controller version that is no longer current
    Superseded,

    /// Explicit eviction requested by a caller
    Manual,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Superseded => write!(f, "superseded by a newer version"),
            InvalidationReason::Manual => write!(f, "manual eviction"),
        }
    }
}

/// The partitions that are current for this controller version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionSet {
    names: BTreeSet<String>,
}

impl PartitionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Names from `existing` that fall outside this set, in input order
    pub fn stale<'a>(&self, existing: &'a [String]) -> Vec<&'a String> {
        existing.iter().filter(|name| !self.contains(name)).collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Record of one invalidation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Partitions that were deleted
    pub partitions: Vec<String>,

    /// Partitions whose deletion failed; they are retried on the next pass
    pub failed: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, partitions: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            partitions,
            failed: Vec::new(),
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
