//! Configuration for the cache controller
//!
//! The configuration names the partitions of the current controller version,
//! the resources to pre-populate on install and the origins that bypass the
//! cache. Bumping `version` makes the next activation purge every partition
//! of the previous version.

use crate::error::{OfflineError, Result};
use crate::policy::ExclusionRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for the interception controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Prefix shared by every partition this controller owns
    pub cache_prefix: String,

    /// Version tag embedded in partition names
    pub version: String,

    /// Location of the controller itself; relative precache entries
    /// resolve against its directory
    pub scope_url: Url,

    /// Resources fetched into the static partition on install, in order
    pub precache: Vec<String>,

    /// Requests matching any rule are never intercepted
    pub exclusions: Vec<ExclusionRule>,

    /// Request immediate takeover once install succeeds
    pub skip_waiting_on_install: bool,

    /// Claim existing clients once activation finishes
    pub claim_on_activate: bool,

    /// Upper bound on a single network fetch. `None` lets fetches run
    /// to completion.
    pub network_timeout: Option<Duration>,

    /// Storage quota in bytes for the cache backend
    pub max_size_bytes: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "ouroboros".to_string(),
            version: "v1".to_string(),
            scope_url: Url::parse("http://localhost/").expect("static URL is valid"),
            precache: Vec::new(),
            exclusions: Vec::new(),
            skip_waiting_on_install: true,
            claim_on_activate: true,
            network_timeout: None,
            max_size_bytes: None,
        }
    }
}

impl ControllerConfig {
    /// Create a new builder for controller configuration
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Name of the partition holding pre-populated assets
    pub fn static_partition(&self) -> String {
        format!("{}-cache-{}", self.cache_prefix, self.version)
    }

    /// Name of the partition holding runtime-fetched entries
    pub fn runtime_partition(&self) -> String {
        format!("{}-runtime-{}", self.cache_prefix, self.version)
    }

    /// Partitions that survive activation
    pub fn designated_partitions(&self) -> Vec<String> {
        vec![self.static_partition(), self.runtime_partition()]
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_prefix.trim().is_empty() {
            return Err(OfflineError::ConfigError(
                "cache_prefix must not be empty".to_string(),
            ));
        }

        if self.version.trim().is_empty() {
            return Err(OfflineError::ConfigError(
                "version must not be empty".to_string(),
            ));
        }

        let invalid = |c: char| c == '/' || c == '\\' || c.is_whitespace();
        if self.cache_prefix.contains(invalid) || self.version.contains(invalid) {
            return Err(OfflineError::ConfigError(
                "cache_prefix and version must not contain slashes or whitespace".to_string(),
            ));
        }

        if self.network_timeout == Some(Duration::ZERO) {
            return Err(OfflineError::ConfigError(
                "network_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_size_bytes == Some(0) {
            return Err(OfflineError::ConfigError(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }

        self.resolve_precache()?;
        Ok(())
    }

    /// Resolve the precache list. Absolute URLs are kept as they are; other
    /// entries are taken relative to the directory of `scope_url`.
    pub fn resolve_precache(&self) -> Result<Vec<Url>> {
        self.precache
            .iter()
            .map(|entry| resolve_locator(&self.scope_url, entry))
            .collect()
    }

    /// Load configuration from the environment (and a `.env` file if present)
    ///
    /// Recognized variables: `OFFLINE_CACHE_PREFIX`, `OFFLINE_CACHE_VERSION`,
    /// `OFFLINE_SCOPE_URL`, `OFFLINE_PRECACHE`, `OFFLINE_EXCLUDE`,
    /// `OFFLINE_NETWORK_TIMEOUT_MS`, `OFFLINE_MAX_SIZE_BYTES`.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {:?}", path);
        }

        let mut builder = Self::builder();

        if let Ok(prefix) = std::env::var("OFFLINE_CACHE_PREFIX") {
            builder = builder.cache_prefix(prefix);
        }
        if let Ok(version) = std::env::var("OFFLINE_CACHE_VERSION") {
            builder = builder.version(version);
        }
        if let Ok(scope) = std::env::var("OFFLINE_SCOPE_URL") {
            builder = builder.scope_url(Url::parse(&scope)?);
        }
        if let Ok(list) = std::env::var("OFFLINE_PRECACHE") {
            builder = builder.precache(split_list(&list));
        }
        if let Ok(list) = std::env::var("OFFLINE_EXCLUDE") {
            builder = builder.exclusions(
                split_list(&list)
                    .into_iter()
                    .map(ExclusionRule::Contains)
                    .collect(),
            );
        }
        if let Ok(ms) = std::env::var("OFFLINE_NETWORK_TIMEOUT_MS") {
            let ms: u64 = ms.parse().map_err(|_| {
                OfflineError::ConfigError(format!(
                    "OFFLINE_NETWORK_TIMEOUT_MS is not a number: {}",
                    ms
                ))
            })?;
            builder = builder.network_timeout(Duration::from_millis(ms));
        }
        if let Ok(bytes) = std::env::var("OFFLINE_MAX_SIZE_BYTES") {
            let bytes: usize = bytes.parse().map_err(|_| {
                OfflineError::ConfigError(format!(
                    "OFFLINE_MAX_SIZE_BYTES is not a number: {}",
                    bytes
                ))
            })?;
            builder = builder.max_size_bytes(bytes);
        }

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve one locator against the controller location
pub fn resolve_locator(scope_url: &Url, locator: &str) -> Result<Url> {
    match Url::parse(locator) {
        Ok(absolute) => Ok(absolute),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            // Leading slashes still mean "under the controller's base path"
            let relative = locator.trim_start_matches('/');
            scope_url.join(relative).map_err(|e| {
                OfflineError::InvalidUrl(format!("{} (relative to {}): {}", locator, scope_url, e))
            })
        }
        Err(e) => Err(OfflineError::InvalidUrl(format!("{}: {}", locator, e))),
    }
}

/// Builder for controller configuration
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    cache_prefix: Option<String>,
    version: Option<String>,
    scope_url: Option<Url>,
    precache: Option<Vec<String>>,
    exclusions: Option<Vec<ExclusionRule>>,
    skip_waiting_on_install: Option<bool>,
    claim_on_activate: Option<bool>,
    network_timeout: Option<Duration>,
    max_size_bytes: Option<usize>,
}

impl ControllerConfigBuilder {
    /// Set the partition name prefix
    pub fn cache_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_prefix = Some(prefix.into());
        self
    }

    /// Set the version tag
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the controller location
    pub fn scope_url(mut self, url: Url) -> Self {
        self.scope_url = Some(url);
        self
    }

    /// Set the precache list
    pub fn precache(mut self, resources: Vec<String>) -> Self {
        self.precache = Some(resources);
        self
    }

    /// Set the exclusion rules
    pub fn exclusions(mut self, rules: Vec<ExclusionRule>) -> Self {
        self.exclusions = Some(rules);
        self
    }

    /// Add a single exclusion rule
    pub fn exclude(mut self, rule: ExclusionRule) -> Self {
        self.exclusions.get_or_insert_with(Vec::new).push(rule);
        self
    }

    pub fn skip_waiting_on_install(mut self, enable: bool) -> Self {
        self.skip_waiting_on_install = Some(enable);
        self
    }

    pub fn claim_on_activate(mut self, enable: bool) -> Self {
        self.claim_on_activate = Some(enable);
        self
    }

    /// Set the network fetch timeout
    pub fn network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    /// Set the storage quota in bytes
    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Build the controller configuration
    pub fn build(self) -> ControllerConfig {
        let defaults = ControllerConfig::default();

        ControllerConfig {
            cache_prefix: self.cache_prefix.unwrap_or(defaults.cache_prefix),
            version: self.version.unwrap_or(defaults.version),
            scope_url: self.scope_url.unwrap_or(defaults.scope_url),
            precache: self.precache.unwrap_or(defaults.precache),
            exclusions: self.exclusions.unwrap_or(defaults.exclusions),
            skip_waiting_on_install: self
                .skip_waiting_on_install
                .unwrap_or(defaults.skip_waiting_on_install),
            claim_on_activate: self.claim_on_activate.unwrap_or(defaults.claim_on_activate),
            network_timeout: self.network_timeout.or(defaults.network_timeout),
            max_size_bytes: self.max_size_bytes.or(defaults.max_size_bytes),
        }
    }
}
