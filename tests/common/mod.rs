//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ouroboros_offline::cache::{CacheEntry, CacheKey, CacheStorage, MemoryStorage};
use ouroboros_offline::{Fetcher, InterceptedRequest, OfflineError, Platform, Response, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// What the scripted network does for one URL
#[derive(Clone)]
pub enum Step {
    Respond(Response),
    Fail,
    /// Never settles
    Hang,
}

/// Fetcher answering from a per-URL script. Unscripted URLs fail.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<HashMap<String, Step>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: Response) {
        self.set(url, Step::Respond(response));
    }

    pub fn fail(&self, url: &str) {
        self.set(url, Step::Fail);
    }

    pub fn hang(&self, url: &str) {
        self.set(url, Step::Hang);
    }

    fn set(&self, url: &str, step: Step) {
        self.script.lock().unwrap().insert(url.to_string(), step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().get(request.url.as_str()).cloned();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Hang) => futures::future::pending().await,
            Some(Step::Fail) | None => Err(OfflineError::NetworkFailure(format!(
                "{}: connection refused",
                request.url
            ))),
        }
    }
}

/// Backend whose every operation fails
pub struct BrokenStorage;

#[async_trait]
impl CacheStorage for BrokenStorage {
    async fn open(&self, _partition: &str) -> Result<()> {
        Ok(())
    }

    async fn get(&self, partition: &str, _key: &CacheKey) -> Result<Option<CacheEntry>> {
        Err(OfflineError::storage(partition, "backend unavailable"))
    }

    async fn put(&self, partition: &str, _entry: CacheEntry) -> Result<()> {
        Err(OfflineError::storage(partition, "backend unavailable"))
    }

    async fn remove(&self, partition: &str, _key: &CacheKey) -> Result<bool> {
        Err(OfflineError::storage(partition, "backend unavailable"))
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>> {
        Err(OfflineError::storage(partition, "backend unavailable"))
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        Err(OfflineError::storage(partition, "backend unavailable"))
    }
}

/// Fetcher whose calls each wait on a gate released by the test, in call order
#[derive(Default)]
pub struct GatedFetcher {
    gates: Mutex<VecDeque<oneshot::Receiver<Response>>>,
    calls: AtomicUsize,
}

impl GatedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a gate for the next call; sending on it completes that fetch
    pub fn gate(&self) -> oneshot::Sender<Response> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().unwrap().push_back(rx);
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gates.lock().unwrap().pop_front();
        match gate {
            Some(rx) => rx.await.map_err(|_| {
                OfflineError::NetworkFailure(format!("{}: gate dropped", request.url))
            }),
            None => Err(OfflineError::NetworkFailure(format!(
                "{}: no gate queued",
                request.url
            ))),
        }
    }
}

/// In-memory backend whose lookups yield to the scheduler before answering
#[derive(Default)]
pub struct SlowLookupStorage {
    inner: MemoryStorage,
}

#[async_trait]
impl CacheStorage for SlowLookupStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        self.inner.open(partition).await
    }

    async fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        self.inner.get(partition, key).await
    }

    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<()> {
        self.inner.put(partition, entry).await
    }

    async fn remove(&self, partition: &str, key: &CacheKey) -> Result<bool> {
        self.inner.remove(partition, key).await
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>> {
        self.inner.keys(partition).await
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        self.inner.partition_names().await
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        self.inner.delete_partition(partition).await
    }
}

/// Platform that refuses to skip waiting
#[derive(Default)]
pub struct StuckPlatform {
    claims: AtomicUsize,
}

impl StuckPlatform {
    pub fn claim_calls(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Platform for StuckPlatform {
    async fn skip_waiting(&self) -> Result<()> {
        Err(OfflineError::Other("another controller is still active".into()))
    }

    async fn claim_clients(&self) -> Result<()> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
