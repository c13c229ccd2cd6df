//! Stale-while-revalidate engine
//!
//! One call to [`RevalidationEngine::handle`] is one cycle:
//!
//! 1. The network fetch is spawned as a background task.
//! 2. The runtime partition is consulted for a cached entry.
//! 3. A cached entry is returned at once; otherwise the caller waits for
//!    whatever the network produces.
//! 4. When the fetch settles, a cacheable response is written back,
//!    overwriting any previous entry. Nothing is written on failure.
//!
//! The write-back runs in a task tracked by [`BackgroundTasks`]; the caller's
//! response never waits for it. Concurrent cycles for the same key are not
//! merged, and the last write-back to finish wins.

use crate::cache::{CacheKey, CacheStoreManager, PartitionHandle};
use crate::error::{OfflineError, Result};
use crate::fetch::{fetch_with_timeout, Fetcher};
use crate::http::{InterceptedRequest, Response};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Which sources produced something usable in one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevalidationOutcome {
    /// Served from cache; the network fetch failed
    CacheHitOnly,
    /// Nothing cached; served from the network
    NetworkHitOnly,
    /// Served from cache; the network fetch also answered
    Both,
    /// No cached entry and no network response
    Neither,
}

impl RevalidationOutcome {
    pub fn classify(cache_hit: bool, network_hit: bool) -> Self {
        match (cache_hit, network_hit) {
            (true, true) => RevalidationOutcome::Both,
            (true, false) => RevalidationOutcome::CacheHitOnly,
            (false, true) => RevalidationOutcome::NetworkHitOnly,
            (false, false) => RevalidationOutcome::Neither,
        }
    }
}

impl fmt::Display for RevalidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevalidationOutcome::CacheHitOnly => write!(f, "cache_hit_only"),
            RevalidationOutcome::NetworkHitOnly => write!(f, "network_hit_only"),
            RevalidationOutcome::Both => write!(f, "both"),
            RevalidationOutcome::Neither => write!(f, "neither"),
        }
    }
}

/// Tracks detached background tasks so they can be awaited on demand
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a task on the current runtime and keep track of it
    pub fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut set = self.lock();
        // Reap finished tasks so a long-lived tracker does not grow
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    /// Number of tasks not yet reaped
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait until every tracked task (including ones spawned meanwhile)
    /// has finished. Returns how many tasks were awaited.
    pub async fn drain(&self) -> usize {
        let mut drained = 0;
        loop {
            let mut batch = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return drained;
            }
            while let Some(result) = batch.join_next().await {
                if let Err(e) = result {
                    warn!("Background task failed: {}", e);
                }
                drained += 1;
            }
        }
    }
}

/// Runs the stale-while-revalidate procedure against one partition
#[derive(Clone)]
pub struct RevalidationEngine {
    store: CacheStoreManager,
    fetcher: Arc<dyn Fetcher>,
    partition: String,
    network_timeout: Option<Duration>,
    tasks: BackgroundTasks,
}

impl RevalidationEngine {
    /// Create an engine writing into `partition`
    pub fn new(
        store: CacheStoreManager,
        fetcher: Arc<dyn Fetcher>,
        partition: impl Into<String>,
    ) -> Self {
        Self {
            store,
            fetcher,
            partition: partition.into(),
            network_timeout: None,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Bound each network fetch
    pub fn with_network_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.network_timeout = timeout;
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn store(&self) -> &CacheStoreManager {
        &self.store
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Run one cycle for `request`
    ///
    /// Resolves as soon as a response is available: immediately on a cache
    /// hit, otherwise when the network settles. The only error returned is
    /// "no response obtainable": nothing cached and the fetch failed.
    pub async fn handle(&self, request: InterceptedRequest) -> Result<Response> {
        let key = CacheKey::from_request(&request).ok_or_else(|| {
            OfflineError::Other(format!("{} requests are never cached", request.method))
        })?;

        let partition = match self.store.open_partition(&self.partition).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Cannot open partition {}, continuing without cache: {}", self.partition, e);
                None
            }
        };

        let (response_tx, response_rx) = oneshot::channel();
        let (hit_tx, hit_rx) = oneshot::channel();
        self.spawn_network(request, key.clone(), partition.clone(), response_tx, hit_rx);

        let cached = match &partition {
            Some(handle) => match handle.get(&key).await {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Cache lookup failed for {}, treating as miss: {}", key, e);
                    None
                }
            },
            None => None,
        };
        let _ = hit_tx.send(cached.is_some());

        if let Some(entry) = cached {
            debug!("Serving {} from cache while revalidating", key);
            return Ok(entry.into_response());
        }

        match response_rx.await {
            Ok(result) => result,
            Err(_) => Err(OfflineError::NetworkFailure(format!(
                "network task for {} ended without a result",
                key
            ))),
        }
    }

    /// Wait for every pending write-back. Returns how many tasks were awaited.
    pub async fn settle(&self) -> usize {
        self.tasks.drain().await
    }

    fn spawn_network(
        &self,
        request: InterceptedRequest,
        key: CacheKey,
        partition: Option<PartitionHandle>,
        response_tx: oneshot::Sender<Result<Response>>,
        hit_rx: oneshot::Receiver<bool>,
    ) {
        let fetcher = self.fetcher.clone();
        let store = self.store.clone();
        let timeout = self.network_timeout;

        self.tasks.spawn(async move {
            store.record(|s| s.background_tasks += 1).await;
            let result = fetch_with_timeout(fetcher.as_ref(), &request, timeout).await;

            let write_back = match &result {
                Ok(response) => {
                    store.record(|s| s.network_successes += 1).await;
                    response.is_cacheable().then(|| response.clone())
                }
                Err(e) => {
                    debug!("Network fetch failed for {}: {}", key, e);
                    store.record(|s| s.network_failures += 1).await;
                    None
                }
            };
            let network_hit = result.is_ok();

            // A waiting caller gets the response before the write starts.
            // The send fails when the caller was served from cache or went away.
            let _ = response_tx.send(result);

            // The lookup must finish first or it could read this cycle's own write
            let cache_hit = hit_rx.await.unwrap_or(false);

            if let (Some(response), Some(handle)) = (write_back, partition) {
                if let Err(e) = handle.put(key.clone(), response).await {
                    warn!("Write-back for {} dropped: {}", key, e);
                }
            }

            let outcome = RevalidationOutcome::classify(cache_hit, network_hit);
            store
                .record(|s| match outcome {
                    RevalidationOutcome::CacheHitOnly => s.outcomes.cache_only += 1,
                    RevalidationOutcome::NetworkHitOnly => s.outcomes.network_only += 1,
                    RevalidationOutcome::Both => s.outcomes.both += 1,
                    RevalidationOutcome::Neither => s.outcomes.neither += 1,
                })
                .await;
            debug!("Cycle for {} settled: {}", key, outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticFetcher(Response);

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _request: &InterceptedRequest) -> Result<Response> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(RevalidationOutcome::classify(true, true), RevalidationOutcome::Both);
        assert_eq!(
            RevalidationOutcome::classify(true, false),
            RevalidationOutcome::CacheHitOnly
        );
        assert_eq!(
            RevalidationOutcome::classify(false, true),
            RevalidationOutcome::NetworkHitOnly
        );
        assert_eq!(RevalidationOutcome::classify(false, false), RevalidationOutcome::Neither);
    }

    #[tokio::test]
    async fn test_background_tasks_drain() {
        let tasks = BackgroundTasks::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for i in 0..3 {
            let tx = tx.clone();
            tasks.spawn(async move {
                tokio::task::yield_now().await;
                let _ = tx.send(i);
            });
        }

        assert_eq!(tasks.drain().await, 3);
        assert_eq!(tasks.pending(), 0);

        let mut seen = Vec::new();
        while let Ok(i) = rx.try_recv() {
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_rejects_non_read_request() {
        let engine = RevalidationEngine::new(
            CacheStoreManager::in_memory(),
            Arc::new(StaticFetcher(Response::ok("x"))),
            "runtime",
        );
        let url = url::Url::parse("https://app.example.com/submit").unwrap();
        let request = InterceptedRequest::new(crate::http::Method::Post, url);

        assert!(engine.handle(request).await.is_err());
        assert_eq!(engine.tasks().pending(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_returned_but_not_cached() {
        let store = CacheStoreManager::in_memory();
        let engine = RevalidationEngine::new(
            store.clone(),
            Arc::new(StaticFetcher(Response::new(404, "missing"))),
            "runtime",
        );

        let request = InterceptedRequest::get("https://app.example.com/gone").unwrap();
        let response = engine.handle(request.clone()).await.unwrap();
        engine.settle().await;

        assert_eq!(response.status, 404);
        let partition = store.open_partition("runtime").await.unwrap();
        let key = CacheKey::from_request(&request).unwrap();
        assert!(partition.get(&key).await.unwrap().is_none());
    }
}
