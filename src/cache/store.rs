//! Cache store manager: named partitions of request-keyed responses
//!
//! Storage backends implement [`CacheStorage`]. The manager is the only
//! component that mutates partitions; the revalidation engine and the
//! controller go through it (or through a [`PartitionHandle`] it hands out).

use crate::cache::{
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason, PartitionSet},
    types::{CacheKey, CacheStats},
};
use crate::error::{OfflineError, Result};
use crate::http::Response;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Key-value backend holding partitions of cache entries
///
/// Every write replaces a whole entry; readers observe either the previous
/// entry or the new one, never a mix.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the partition if absent
    async fn open(&self, partition: &str) -> Result<()>;

    /// Look up an entry. A missing partition or key is `Ok(None)`.
    async fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Store an entry, replacing any previous entry with the same key
    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<()>;

    /// Remove one entry; returns whether it existed
    async fn remove(&self, partition: &str, key: &CacheKey) -> Result<bool>;

    /// Keys present in a partition
    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>>;

    /// Names of all partitions
    async fn partition_names(&self) -> Result<Vec<String>>;

    /// Delete a partition and its entries; returns whether it existed
    async fn delete_partition(&self, partition: &str) -> Result<bool>;
}

/// In-memory backend
///
/// Entries are shared as `Arc` so a write swaps the pointer under the lock.
#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryInner>,
    max_size_bytes: Option<usize>,
}

#[derive(Default)]
struct MemoryInner {
    partitions: BTreeMap<String, HashMap<CacheKey, Arc<CacheEntry>>>,
    current_size_bytes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that rejects writes which would grow it past `max_size_bytes`
    pub fn with_quota(max_size_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            max_size_bytes: Some(max_size_bytes),
        }
    }

    /// Total size of stored entries in bytes
    pub async fn size_bytes(&self) -> usize {
        self.inner.read().await.current_size_bytes
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.partitions.entry(partition.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let inner = self.inner.read().await;
        Ok(inner
            .partitions
            .get(partition)
            .and_then(|entries| entries.get(key))
            .map(|entry| entry.as_ref().clone()))
    }

    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<()> {
        let mut inner = self.inner.write().await;

        let new_size = entry.metadata.size_bytes;
        let old_size = inner
            .partitions
            .get(partition)
            .and_then(|entries| entries.get(&entry.key))
            .map(|e| e.metadata.size_bytes)
            .unwrap_or(0);
        let projected = inner.current_size_bytes - old_size + new_size;

        if let Some(limit) = self.max_size_bytes {
            if projected > limit {
                return Err(OfflineError::QuotaExceeded {
                    partition: partition.to_string(),
                    needed: projected,
                    limit,
                });
            }
        }

        inner
            .partitions
            .entry(partition.to_string())
            .or_default()
            .insert(entry.key.clone(), Arc::new(entry));
        inner.current_size_bytes = projected;
        Ok(())
    }

    async fn remove(&self, partition: &str, key: &CacheKey) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let removed = inner
            .partitions
            .get_mut(partition)
            .and_then(|entries| entries.remove(key));

        match removed {
            Some(entry) => {
                inner.current_size_bytes = inner
                    .current_size_bytes
                    .saturating_sub(entry.metadata.size_bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>> {
        let inner = self.inner.read().await;
        Ok(inner
            .partitions
            .get(partition)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner.partitions.keys().cloned().collect())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.partitions.remove(partition) {
            Some(entries) => {
                let freed: usize = entries.values().map(|e| e.metadata.size_bytes).sum();
                inner.current_size_bytes = inner.current_size_bytes.saturating_sub(freed);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Owns all partition state and tracks cache statistics
#[derive(Clone)]
pub struct CacheStoreManager {
    storage: Arc<dyn CacheStorage>,
    stats: Arc<RwLock<CacheStats>>,
}

impl CacheStoreManager {
    /// Create a manager over the given backend
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self {
            storage,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    /// Manager backed by a fresh [`MemoryStorage`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Open (creating if absent) a partition. Idempotent.
    pub async fn open_partition(&self, name: &str) -> Result<PartitionHandle> {
        self.storage.open(name).await?;
        Ok(PartitionHandle {
            name: name.to_string(),
            manager: self.clone(),
        })
    }

    /// Enumerate partition names
    pub async fn list_partition_names(&self) -> Result<Vec<String>> {
        self.storage.partition_names().await
    }

    /// Delete a partition and all its entries. Deleting a missing partition
    /// is a successful no-op.
    pub async fn delete_partition(&self, name: &str) -> Result<()> {
        if self.storage.delete_partition(name).await? {
            info!("Deleted cache partition: {}", name);
            self.stats.write().await.partitions_deleted += 1;
        } else {
            debug!("Partition already absent: {}", name);
        }
        Ok(())
    }

    /// Delete every partition outside `current`
    ///
    /// A partition that fails to delete is logged and listed in the event's
    /// `failed` field; it does not stop the pass.
    pub async fn retain_partitions(&self, current: &PartitionSet) -> Result<InvalidationEvent> {
        let existing = self.list_partition_names().await?;
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        for name in current.stale(&existing) {
            info!("Deleting old cache: {}", name);
            match self.delete_partition(name).await {
                Ok(()) => deleted.push(name.clone()),
                Err(e) => {
                    warn!("Failed to delete partition {}: {}", name, e);
                    failed.push(name.clone());
                }
            }
        }

        let kept = existing.len() - deleted.len();
        let mut event = InvalidationEvent::new(InvalidationReason::Superseded, deleted)
            .with_context(format!("Kept {} of {} partitions", kept, existing.len()));
        event.failed = failed;
        Ok(event)
    }

    /// Delete the named partitions on request
    pub async fn evict_partitions(&self, names: &[String]) -> Result<InvalidationEvent> {
        let mut deleted = Vec::new();
        let mut failed = Vec::new();

        for name in names {
            match self.storage.delete_partition(name).await {
                Ok(true) => {
                    info!("Evicted cache partition: {}", name);
                    self.stats.write().await.partitions_deleted += 1;
                    deleted.push(name.clone());
                }
                Ok(false) => debug!("Partition already absent: {}", name),
                Err(e) => {
                    warn!("Failed to evict partition {}: {}", name, e);
                    failed.push(name.clone());
                }
            }
        }

        let mut event = InvalidationEvent::new(InvalidationReason::Manual, deleted);
        event.failed = failed;
        Ok(event)
    }

    /// Snapshot of the cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    /// Apply an update to the statistics
    pub(crate) async fn record<F>(&self, update: F)
    where
        F: FnOnce(&mut CacheStats),
    {
        let mut stats = self.stats.write().await;
        update(&mut stats);
    }

    pub fn storage(&self) -> Arc<dyn CacheStorage> {
        self.storage.clone()
    }
}

/// Handle to one open partition
#[derive(Clone)]
pub struct PartitionHandle {
    name: String,
    manager: CacheStoreManager,
}

impl PartitionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the entry for `key`; absence is not an error
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entry = self.manager.storage.get(&self.name, key).await?;
        match &entry {
            Some(_) => {
                debug!("Cache hit in {}: {}", self.name, key);
                self.manager.record(|s| s.hits += 1).await;
            }
            None => {
                debug!("Cache miss in {}: {}", self.name, key);
                self.manager.record(|s| s.misses += 1).await;
            }
        }
        Ok(entry)
    }

    /// Replace the entry for `key` with `response`
    pub async fn put(&self, key: CacheKey, response: Response) -> Result<()> {
        self.put_entry(CacheEntry::new(key, response)).await
    }

    /// Replace the entry with the same key
    pub async fn put_entry(&self, entry: CacheEntry) -> Result<()> {
        let key = entry.key.clone();
        match self.manager.storage.put(&self.name, entry).await {
            Ok(()) => {
                debug!("Stored {} in {}", key, self.name);
                self.manager.record(|s| s.writes += 1).await;
                Ok(())
            }
            Err(e) => {
                self.manager.record(|s| s.failed_writes += 1).await;
                Err(e)
            }
        }
    }

    /// Evict one entry; returns whether it existed
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        self.manager.storage.remove(&self.name, key).await
    }

    pub async fn keys(&self) -> Result<Vec<CacheKey>> {
        self.manager.storage.keys(&self.name).await
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
