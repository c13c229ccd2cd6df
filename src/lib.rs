//! # Ouroboros Offline (ouroboros-offline)
//!
//! A stale-while-revalidate cache controller for intercepted HTTP requests.
//!
//! ## Features
//!
//! - Cached responses are returned immediately while a network refresh runs
//!   in the background
//! - Cache misses wait for the network; failures never poison the cache
//! - Versioned partitions with whole-partition garbage collection on activation
//! - All-or-nothing pre-population of static assets on install
//! - Per-origin exclusions for live data that must always be fresh
//! - In-memory and filesystem storage backends
//!
//! ## Handling a request
//!
//! ```no_run
//! use std::sync::Arc;
//! use ouroboros_offline::{
//!     CacheStoreManager, ControllerConfig, HttpFetcher, InterceptedRequest,
//!     InterceptionController, LifecycleHooks, FetchDisposition, StandalonePlatform,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ControllerConfig::builder()
//!         .version("v2")
//!         .precache(vec!["index.html".into(), "app.js".into()])
//!         .build();
//!
//!     let controller = InterceptionController::new(
//!         config,
//!         CacheStoreManager::in_memory(),
//!         Arc::new(HttpFetcher::new()?),
//!         Arc::new(StandalonePlatform::new()),
//!     )?;
//!
//!     controller.on_install().await?;
//!     controller.on_activate().await?;
//!
//!     let request = InterceptedRequest::get("http://localhost/data.json")?;
//!     if let FetchDisposition::Respond(response) = controller.on_fetch(request).await? {
//!         println!("{}: {}", response.status, response.text());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Driving it from a host
//!
//! Hosts that deliver events rather than calling the hooks directly use
//! [`dispatch`](platform::dispatch):
//!
//! ```no_run
//! use ouroboros_offline::platform::{dispatch, EventReply, LifecycleEvent};
//! use ouroboros_offline::LifecycleHooks;
//!
//! async fn on_message(hooks: &dyn LifecycleHooks) -> ouroboros_offline::Result<()> {
//!     let payload = serde_json::json!({"type": "SKIP_WAITING"});
//!     let reply = dispatch(hooks, LifecycleEvent::Message(payload)).await?;
//!     assert!(matches!(reply, EventReply::Done));
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod http;
pub mod platform;
pub mod policy;
pub mod proxy;
pub mod revalidate;

pub use cache::{CacheKey, CacheStats, CacheStoreManager, DiskStorage, MemoryStorage};
pub use config::ControllerConfig;
pub use controller::{ControllerState, FetchDisposition, InterceptionController, LifecycleHooks};
pub use error::{OfflineError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use http::{InterceptedRequest, Method, Response};
pub use platform::{Platform, StandalonePlatform};
pub use policy::{ExclusionPolicy, ExclusionRule};
pub use revalidate::{RevalidationEngine, RevalidationOutcome};
