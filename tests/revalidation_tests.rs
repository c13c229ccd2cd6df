//! Integration tests for the stale-while-revalidate cycle
//!
//! These tests drive the revalidation engine against a scripted network:
//! - Cache hits served without waiting for the network
//! - Misses served from the network and written back
//! - Failures never reaching the cache
//! - Storage failures downgraded to misses

mod common;

use common::{BrokenStorage, GatedFetcher, ScriptedFetcher, SlowLookupStorage};
use ouroboros_offline::cache::{CacheKey, CacheStorage, CacheStoreManager};
use ouroboros_offline::{InterceptedRequest, Method, OfflineError, Response, RevalidationEngine};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const RUNTIME: &str = "ouroboros-runtime-v1";
const DATA_URL: &str = "https://app.example.com/data.json";

fn engine(store: &CacheStoreManager, fetcher: &Arc<ScriptedFetcher>) -> RevalidationEngine {
    RevalidationEngine::new(store.clone(), fetcher.clone(), RUNTIME)
}

async fn seed(store: &CacheStoreManager, url: &str, response: Response) {
    let partition = store.open_partition(RUNTIME).await.unwrap();
    let request = InterceptedRequest::get(url).unwrap();
    partition
        .put(CacheKey::from_request(&request).unwrap(), response)
        .await
        .unwrap();
}

async fn cached(store: &CacheStoreManager, url: &str) -> Option<Response> {
    let storage = store.storage();
    let request = InterceptedRequest::get(url).unwrap();
    storage
        .get(RUNTIME, &CacheKey::from_request(&request).unwrap())
        .await
        .unwrap()
        .map(|entry| entry.into_response())
}

#[tokio::test]
async fn test_cache_hit_does_not_wait_for_network() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.hang(DATA_URL);
    seed(&store, DATA_URL, Response::ok(r#"{"x":1}"#)).await;

    let engine = engine(&store, &fetcher);
    let request = InterceptedRequest::get(DATA_URL).unwrap();

    let response = tokio::time::timeout(Duration::from_secs(5), engine.handle(request))
        .await
        .expect("cached response should not wait for the network")
        .unwrap();

    assert_eq!(response.text(), r#"{"x":1}"#);
    assert_eq!(store.stats().await.hits, 1);
}

#[tokio::test]
async fn test_miss_is_served_from_network_and_written_back() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(DATA_URL, Response::ok(r#"{"x":1}"#));

    let engine = engine(&store, &fetcher);
    let response = assert_ok!(engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await);
    assert_eq!(response.text(), r#"{"x":1}"#);

    assert_eq!(engine.settle().await, 1);
    assert_eq!(cached(&store, DATA_URL).await, Some(Response::ok(r#"{"x":1}"#)));

    let stats = store.stats().await;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.writes, 1);
    assert_eq!(stats.outcomes.network_only, 1);
}

#[tokio::test]
async fn test_offline_after_first_visit() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(DATA_URL, Response::ok(r#"{"x":1}"#));
    let engine = engine(&store, &fetcher);

    // First visit populates the runtime partition
    engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;

    // Network goes away; the cached copy is still served
    fetcher.fail(DATA_URL);
    let response = engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;

    assert_eq!(response.text(), r#"{"x":1}"#);
    assert_eq!(cached(&store, DATA_URL).await, Some(Response::ok(r#"{"x":1}"#)));

    let stats = store.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.network_successes, 1);
    assert_eq!(stats.network_failures, 1);
    assert_eq!(stats.outcomes.network_only, 1);
    assert_eq!(stats.outcomes.cache_only, 1);
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_stale_entry_is_refreshed_in_background() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    seed(&store, DATA_URL, Response::ok(r#"{"x":1}"#)).await;
    fetcher.respond(DATA_URL, Response::ok(r#"{"x":2}"#));
    let engine = engine(&store, &fetcher);

    let first = engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;
    let second = engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;

    assert_eq!(first.text(), r#"{"x":1}"#);
    assert_eq!(second.text(), r#"{"x":2}"#);
    assert_eq!(store.stats().await.outcomes.both, 2);
}

#[tokio::test]
async fn test_miss_with_network_failure_writes_nothing() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.fail(DATA_URL);
    let engine = engine(&store, &fetcher);

    let error = assert_err!(engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await);
    assert!(error.is_network());

    engine.settle().await;
    assert_eq!(cached(&store, DATA_URL).await, None);

    let stats = store.stats().await;
    assert_eq!(stats.writes, 0);
    assert_eq!(stats.outcomes.neither, 1);
}

#[tokio::test]
async fn test_error_status_does_not_overwrite_cached_entry() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    seed(&store, DATA_URL, Response::ok(r#"{"x":1}"#)).await;
    fetcher.respond(DATA_URL, Response::new(500, "upstream exploded"));
    let engine = engine(&store, &fetcher);

    let response = engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;

    assert_eq!(response.status, 200);
    assert_eq!(cached(&store, DATA_URL).await, Some(Response::ok(r#"{"x":1}"#)));
}

#[tokio::test]
async fn test_repeated_identical_responses_keep_one_entry() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(DATA_URL, Response::ok(r#"{"x":1}"#));
    let engine = engine(&store, &fetcher);

    let (a, b) = tokio::join!(
        engine.handle(InterceptedRequest::get(DATA_URL).unwrap()),
        engine.handle(InterceptedRequest::get(DATA_URL).unwrap()),
    );
    assert_eq!(a.unwrap(), b.unwrap());
    engine.settle().await;

    let partition = store.open_partition(RUNTIME).await.unwrap();
    assert_eq!(partition.len().await.unwrap(), 1);
    assert_eq!(cached(&store, DATA_URL).await, Some(Response::ok(r#"{"x":1}"#)));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_later_completion_wins_the_write_back() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(GatedFetcher::new());
    let first = fetcher.gate();
    let second = fetcher.gate();
    let engine = RevalidationEngine::new(store.clone(), fetcher.clone(), RUNTIME);

    let release = async {
        while fetcher.calls() < 2 {
            tokio::task::yield_now().await;
        }
        // The second fetch completes and is written back first
        second.send(Response::ok("second")).unwrap();
        while cached(&store, DATA_URL).await.is_none() {
            tokio::task::yield_now().await;
        }
        first.send(Response::ok("first")).unwrap();
    };

    let (a, b, ()) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(
            engine.handle(InterceptedRequest::get(DATA_URL).unwrap()),
            engine.handle(InterceptedRequest::get(DATA_URL).unwrap()),
            release,
        )
    })
    .await
    .expect("both cycles should complete");
    engine.settle().await;

    let mut bodies = vec![a.unwrap().text(), b.unwrap().text()];
    bodies.sort();
    assert_eq!(bodies, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(cached(&store, DATA_URL).await, Some(Response::ok("first")));
    assert_eq!(store.stats().await.writes, 2);
}

#[tokio::test]
async fn test_cold_lookup_never_sees_its_own_write_back() {
    let store = CacheStoreManager::new(Arc::new(SlowLookupStorage::default()));
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(DATA_URL, Response::ok(r#"{"x":1}"#));
    let engine = engine(&store, &fetcher);

    let response = engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;

    assert_eq!(response.text(), r#"{"x":1}"#);
    assert_eq!(cached(&store, DATA_URL).await, Some(Response::ok(r#"{"x":1}"#)));

    let stats = store.stats().await;
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.outcomes.network_only, 1);
    assert_eq!(stats.outcomes.both, 0);
}

#[tokio::test]
async fn test_head_and_get_are_cached_separately() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    seed(&store, DATA_URL, Response::ok(r#"{"x":1}"#)).await;
    fetcher.respond(DATA_URL, Response::ok(Vec::<u8>::new()));
    let engine = engine(&store, &fetcher);

    let url = url::Url::parse(DATA_URL).unwrap();
    let head = InterceptedRequest::new(Method::Head, url);
    let response = engine.handle(head).await.unwrap();
    engine.settle().await;

    assert!(response.body.is_empty());
    assert_eq!(store.stats().await.outcomes.network_only, 1);
}

#[tokio::test]
async fn test_storage_failure_downgrades_to_network() {
    let store = CacheStoreManager::new(Arc::new(BrokenStorage));
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(DATA_URL, Response::ok(r#"{"x":1}"#));
    let engine = engine(&store, &fetcher);

    let response = engine.handle(InterceptedRequest::get(DATA_URL).unwrap()).await.unwrap();
    engine.settle().await;

    assert_eq!(response.text(), r#"{"x":1}"#);
    let stats = store.stats().await;
    assert_eq!(stats.writes, 0);
    assert_eq!(stats.failed_writes, 1);
}

#[tokio::test]
async fn test_storage_failure_and_network_failure_is_an_error() {
    let store = CacheStoreManager::new(Arc::new(BrokenStorage));
    let fetcher = Arc::new(ScriptedFetcher::new());
    let engine = engine(&store, &fetcher);

    let error = engine
        .handle(InterceptedRequest::get(DATA_URL).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(error, OfflineError::NetworkFailure(_)));
}

#[tokio::test(start_paused = true)]
async fn test_network_timeout_on_miss() {
    let store = CacheStoreManager::in_memory();
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.hang(DATA_URL);
    let engine = engine(&store, &fetcher).with_network_timeout(Some(Duration::from_millis(250)));

    let error = engine
        .handle(InterceptedRequest::get(DATA_URL).unwrap())
        .await
        .unwrap_err();
    engine.settle().await;

    assert!(matches!(error, OfflineError::NetworkTimeout { timeout_ms: 250, .. }));
    assert_eq!(store.stats().await.network_failures, 1);
}
