//! Filesystem backend
//!
//! # Layout
//!
//! ```text
//! {root}/{partition}/
//!   {sha256_hex(key)}.json   # serialized CacheEntry
//! ```
//!
//! Entries are written to a temporary file in the same directory and renamed
//! into place, so a concurrent reader sees either the old file or the new one.

use crate::cache::{entry::CacheEntry, store::CacheStorage, types::CacheKey};
use crate::error::{OfflineError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const ENTRY_EXT: &str = "json";

/// Persistent backend storing one JSON file per entry
#[derive(Debug)]
pub struct DiskStorage {
    root: PathBuf,
    max_size_bytes: Option<usize>,
    tmp_counter: AtomicU64,
    /// Bytes held by entry files under `root`
    used_bytes: Mutex<u64>,
}

impl DiskStorage {
    /// Open (creating if needed) a storage root
    pub async fn open_root(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let used = scan_size(&root).await?;
        debug!("Opened {:?} holding {} bytes", root, used);
        Ok(Self {
            root,
            max_size_bytes: None,
            tmp_counter: AtomicU64::new(0),
            used_bytes: Mutex::new(used),
        })
    }

    /// Reject writes that would grow the root past `max_size_bytes`
    pub fn with_quota(mut self, max_size_bytes: usize) -> Self {
        self.max_size_bytes = Some(max_size_bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bytes currently held by entries across all partitions
    pub async fn size_bytes(&self) -> u64 {
        *self.used_bytes.lock().await
    }

    fn partition_dir(&self, partition: &str) -> Result<PathBuf> {
        validate_partition_name(partition)?;
        Ok(self.root.join(partition))
    }

    fn entry_path(&self, partition: &str, key: &CacheKey) -> Result<PathBuf> {
        Ok(self
            .partition_dir(partition)?
            .join(format!("{}.{}", sha256_hex(&key.to_string()), ENTRY_EXT)))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

}

async fn file_len(path: &Path) -> u64 {
    fs::metadata(path).await.map(|meta| meta.len()).unwrap_or(0)
}

/// Sum of entry file sizes in one partition directory
async fn dir_size(dir: &Path) -> Result<u64> {
    let mut total = 0;
    let mut files = match fs::read_dir(dir).await {
        Ok(files) => files,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(file) = files.next_entry().await? {
        if file.path().extension().and_then(|e| e.to_str()) == Some(ENTRY_EXT) {
            total += file.metadata().await?.len();
        }
    }
    Ok(total)
}

/// One walk over the root, done when the storage is opened
async fn scan_size(root: &Path) -> Result<u64> {
    let mut total = 0;
    let mut partitions = fs::read_dir(root).await?;
    while let Some(dir) = partitions.next_entry().await? {
        if dir.file_type().await?.is_dir() {
            total += dir_size(&dir.path()).await?;
        }
    }
    Ok(total)
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, partition: &str) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| OfflineError::storage(partition, e))
    }

    async fn get(&self, partition: &str, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(partition, key)?;
        let entry = self
            .read_entry(&path)
            .await
            .map_err(|e| OfflineError::storage(partition, e))?;

        // Hash collision: the file belongs to another key
        Ok(entry.filter(|e| &e.key == key))
    }

    async fn put(&self, partition: &str, entry: CacheEntry) -> Result<()> {
        let dir = self.partition_dir(partition)?;
        let path = self.entry_path(partition, &entry.key)?;
        let bytes = serde_json::to_vec(&entry)?;

        let mut used = self.used_bytes.lock().await;
        let existing = file_len(&path).await;
        let projected = used.saturating_sub(existing) + bytes.len() as u64;
        if let Some(limit) = self.max_size_bytes {
            if projected > limit as u64 {
                return Err(OfflineError::QuotaExceeded {
                    partition: partition.to_string(),
                    needed: projected as usize,
                    limit,
                });
            }
        }

        fs::create_dir_all(&dir)
            .await
            .map_err(|e| OfflineError::storage(partition, e))?;

        let tmp = dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            self.tmp_counter.fetch_add(1, Ordering::Relaxed)
        ));
        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(OfflineError::storage(partition, e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(OfflineError::storage(partition, e));
        }
        *used = projected;

        debug!("Wrote {} ({} bytes) to {:?}", entry.key, bytes.len(), path);
        Ok(())
    }

    async fn remove(&self, partition: &str, key: &CacheKey) -> Result<bool> {
        let path = self.entry_path(partition, key)?;
        match self.read_entry(&path).await {
            Ok(Some(entry)) if &entry.key == key => {}
            Ok(_) => return Ok(false),
            Err(e) => return Err(OfflineError::storage(partition, e)),
        }
        let mut used = self.used_bytes.lock().await;
        let len = file_len(&path).await;
        match fs::remove_file(&path).await {
            Ok(()) => {
                *used = used.saturating_sub(len);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(OfflineError::storage(partition, e)),
        }
    }

    async fn keys(&self, partition: &str) -> Result<Vec<CacheKey>> {
        let dir = self.partition_dir(partition)?;
        let mut files = match fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(OfflineError::storage(partition, e)),
        };

        let mut keys = Vec::new();
        while let Some(file) = files
            .next_entry()
            .await
            .map_err(|e| OfflineError::storage(partition, e))?
        {
            let path = file.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match self.read_entry(&path).await {
                Ok(Some(entry)) => keys.push(entry.key),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable entry {:?}: {}", path, e),
            }
        }
        Ok(keys)
    }

    async fn partition_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut dirs = fs::read_dir(&self.root).await?;
        while let Some(dir) = dirs.next_entry().await? {
            if !dir.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = dir.file_name().to_str() {
                if validate_partition_name(name).is_ok() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_partition(&self, partition: &str) -> Result<bool> {
        let dir = self.partition_dir(partition)?;
        let mut used = self.used_bytes.lock().await;
        let len = dir_size(&dir)
            .await
            .map_err(|e| OfflineError::storage(partition, e))?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                *used = used.saturating_sub(len);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(OfflineError::storage(partition, e)),
        }
    }
}

/// Partition names become directory names
fn validate_partition_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(OfflineError::storage(name, "invalid partition name"))
    }
}

fn sha256_hex(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
