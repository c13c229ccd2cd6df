//! # Cache Store
//!
//! Named, versioned partitions mapping request keys to stored responses.
//!
//! ## Features
//!
//! - **Partitions**: one static partition (pre-populated assets) and one
//!   runtime partition (entries written by revalidation) per controller version
//! - **Whole-entry replacement**: a write swaps the entire entry, never part of it
//! - **Version GC**: activation deletes every partition outside the current set
//! - **Pluggable backends**: in-memory for tests, filesystem for persistence
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_offline::cache::{CacheKey, CacheStoreManager};
//! use ouroboros_offline::Response;
//! use url::Url;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let manager = CacheStoreManager::in_memory();
//! let runtime = manager.open_partition("ouroboros-runtime-v1").await?;
//!
//! let key = CacheKey::get(&Url::parse("https://app.example.com/data.json")?);
//! runtime.put(key.clone(), Response::ok(r#"{"x":1}"#)).await?;
//!
//! if let Some(entry) = runtime.get(&key).await? {
//!     println!("Cache hit: {}", entry.response.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod disk;
pub mod entry;
pub mod invalidation;
pub mod store;
pub mod types;

pub use disk::DiskStorage;
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationReason, PartitionSet};
pub use store::{CacheStorage, CacheStoreManager, MemoryStorage, PartitionHandle};
pub use types::{CacheKey, CacheStats, OutcomeCounts};
