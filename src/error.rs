//! Error types for the offline cache controller
//!
//! The variants follow the failure classes of a revalidation cycle: storage,
//! network, install and lifecycle-signal failures. Only install failures are
//! fatal; the rest are downgraded by the revalidation engine.

use thiserror::Error;

/// Main error type for cache controller operations
#[derive(Error, Debug)]
pub enum OfflineError {
    /// Cache read, write or delete failed
    #[error("Storage error in partition '{partition}': {reason}")]
    StorageFailure { partition: String, reason: String },

    /// Storage quota would be exceeded by a write
    #[error("Quota exceeded in partition '{partition}': need {needed} bytes, limit is {limit}")]
    QuotaExceeded {
        partition: String,
        needed: usize,
        limit: usize,
    },

    /// Network fetch failed before a response was received
    #[error("Network error: {0}")]
    NetworkFailure(String),

    /// Network fetch did not settle in time
    #[error("Network fetch timed out after {timeout_ms}ms: {url}")]
    NetworkTimeout { timeout_ms: u64, url: String },

    /// A pre-population resource could not be fetched
    #[error("Install failed for {url}: {reason}")]
    InstallFailure { url: String, reason: String },

    /// Lifecycle transition not allowed from the current state
    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: String, state: String },

    /// Malformed or unrecognized control message
    #[error("Lifecycle signal error: {0}")]
    LifecycleSignal(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// URL could not be parsed or resolved
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Serialization/Deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(String),
}

impl OfflineError {
    /// Build a storage failure for the given partition
    pub fn storage(partition: impl Into<String>, reason: impl ToString) -> Self {
        OfflineError::StorageFailure {
            partition: partition.into(),
            reason: reason.to_string(),
        }
    }

    /// True for failures of the cache store (including quota)
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            OfflineError::StorageFailure { .. }
                | OfflineError::QuotaExceeded { .. }
                | OfflineError::Io(_)
        )
    }

    /// True for failures of the network fetch
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            OfflineError::NetworkFailure(_) | OfflineError::NetworkTimeout { .. }
        )
    }
}

/// Result type alias for cache controller operations
pub type Result<T> = std::result::Result<T, OfflineError>;

impl From<String> for OfflineError {
    fn from(s: String) -> Self {
        OfflineError::Other(s)
    }
}

impl From<&str> for OfflineError {
    fn from(s: &str) -> Self {
        OfflineError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for OfflineError {
    fn from(e: serde_json::Error) -> Self {
        OfflineError::SerializationError(e.to_string())
    }
}

impl From<url::ParseError> for OfflineError {
    fn from(e: url::ParseError) -> Self {
        OfflineError::InvalidUrl(e.to_string())
    }
}
