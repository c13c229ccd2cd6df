//! Interception controller
//!
//! Decides which requests go through the revalidation engine and maps the
//! host lifecycle onto the partition lifecycle:
//!
//! ```text
//! Installing -> Waiting -> Activating -> Active
//!      \                                   \
//!       +-> Redundant (install failed)      +-> Redundant (superseded)
//! ```

use crate::cache::{CacheKey, CacheStoreManager, InvalidationEvent, PartitionSet};
use crate::config::ControllerConfig;
use crate::error::{OfflineError, Result};
use crate::fetch::{fetch_with_timeout, Fetcher};
use crate::http::{InterceptedRequest, Response};
use crate::platform::{ControlMessage, Platform};
use crate::policy::{ExclusionPolicy, RuleExclusionPolicy};
use crate::revalidate::RevalidationEngine;
use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Lifecycle state of one controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    Installing,
    Waiting,
    Activating,
    Active,
    /// Install failed or a newer controller took over
    Redundant,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Installing => write!(f, "installing"),
            ControllerState::Waiting => write!(f, "waiting"),
            ControllerState::Activating => write!(f, "activating"),
            ControllerState::Active => write!(f, "active"),
            ControllerState::Redundant => write!(f, "redundant"),
        }
    }
}

/// Result of intercepting one request
#[derive(Debug)]
pub enum FetchDisposition {
    /// The controller produced the response
    Respond(Response),
    /// Not intercepted; the host fetches it normally
    PassThrough(InterceptedRequest),
}

/// Hooks invoked by the platform adapter
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_install(&self) -> Result<()>;

    async fn on_activate(&self) -> Result<InvalidationEvent>;

    async fn on_fetch(&self, request: InterceptedRequest) -> Result<FetchDisposition>;

    async fn on_message(&self, payload: &serde_json::Value) -> Result<()>;
}

/// Request/response boundary of the cache controller
pub struct InterceptionController {
    config: ControllerConfig,
    store: CacheStoreManager,
    fetcher: Arc<dyn Fetcher>,
    engine: RevalidationEngine,
    exclusions: Arc<dyn ExclusionPolicy>,
    platform: Arc<dyn Platform>,
    state: RwLock<ControllerState>,
}

impl InterceptionController {
    /// Create a controller in the `Installing` state
    ///
    /// Exclusions come from `config.exclusions`; use
    /// [`with_exclusion_policy`](Self::with_exclusion_policy) for a custom predicate.
    pub fn new(
        config: ControllerConfig,
        store: CacheStoreManager,
        fetcher: Arc<dyn Fetcher>,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        config.validate()?;

        let engine =
            RevalidationEngine::new(store.clone(), fetcher.clone(), config.runtime_partition())
                .with_network_timeout(config.network_timeout);
        let exclusions = Arc::new(RuleExclusionPolicy::new(config.exclusions.clone()));

        info!(
            "Controller {} created (static: {}, runtime: {})",
            config.version,
            config.static_partition(),
            config.runtime_partition()
        );

        Ok(Self {
            config,
            store,
            fetcher,
            engine,
            exclusions,
            platform,
            state: RwLock::new(ControllerState::Installing),
        })
    }

    /// Replace the exclusion policy
    pub fn with_exclusion_policy(mut self, policy: Arc<dyn ExclusionPolicy>) -> Self {
        self.exclusions = policy;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn store(&self) -> &CacheStoreManager {
        &self.store
    }

    pub fn engine(&self) -> &RevalidationEngine {
        &self.engine
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    /// Read request whose URL is not excluded
    pub fn is_eligible(&self, request: &InterceptedRequest) -> bool {
        request.method.is_read() && !self.exclusions.is_excluded(&request.url)
    }

    /// Forward a takeover request to the platform
    pub async fn on_takeover_request(&self) -> Result<()> {
        info!("Takeover requested for controller {}", self.config.version);
        self.platform.skip_waiting().await
    }

    /// Mark this instance as replaced by a newer controller
    pub async fn retire(&self) {
        let mut state = self.state.write().await;
        if *state != ControllerState::Redundant {
            info!("Controller {} superseded", self.config.version);
            *state = ControllerState::Redundant;
        }
    }

    async fn transition(
        &self,
        expected: ControllerState,
        next: ControllerState,
        action: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if *state != expected {
            return Err(OfflineError::InvalidTransition {
                action: action.to_string(),
                state: state.to_string(),
            });
        }
        debug!("Controller {}: {} -> {}", self.config.version, *state, next);
        *state = next;
        Ok(())
    }

    async fn set_state(&self, next: ControllerState) {
        *self.state.write().await = next;
    }

    /// Fetch every precache resource; all must succeed
    async fn fetch_precache(&self, urls: Vec<Url>) -> Result<Vec<(Url, Response)>> {
        let fetches = urls.into_iter().map(|url| async move {
            let request = InterceptedRequest::new(crate::http::Method::Get, url.clone());
            let timeout = self.config.network_timeout;
            let response = fetch_with_timeout(self.fetcher.as_ref(), &request, timeout)
                .await
                .map_err(|e| OfflineError::InstallFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            if !response.is_cacheable() {
                return Err(OfflineError::InstallFailure {
                    url: url.to_string(),
                    reason: format!("status {}", response.status),
                });
            }
            Ok::<_, OfflineError>((url, response))
        });
        try_join_all(fetches).await
    }

    async fn populate_static(&self) -> Result<()> {
        let urls = self.config.resolve_precache().map_err(|e| OfflineError::InstallFailure {
            url: self.config.scope_url.to_string(),
            reason: e.to_string(),
        })?;

        info!("Pre-caching {} static assets", urls.len());
        let fetched = self.fetch_precache(urls).await?;

        let partition = self
            .store
            .open_partition(&self.config.static_partition())
            .await
            .map_err(|e| OfflineError::InstallFailure {
                url: self.config.static_partition(),
                reason: e.to_string(),
            })?;

        let storage = self.store.storage();
        let mut written = Vec::with_capacity(fetched.len());
        for (url, response) in fetched {
            let key = CacheKey::get(&url);
            let previous = storage
                .get(partition.name(), &key)
                .await
                .map_err(|e| OfflineError::InstallFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

            if let Err(e) = partition.put(key.clone(), response).await {
                // Restore what was there before so the partition is all or nothing
                for (key, previous) in written.into_iter().rev() {
                    let restored = match previous {
                        Some(entry) => partition.put_entry(entry).await,
                        None => partition.delete(&key).await.map(|_| ()),
                    };
                    if let Err(e) = restored {
                        warn!("Rollback of {} failed: {}", key, e);
                    }
                }
                return Err(OfflineError::InstallFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
            written.push((key, previous));
        }
        Ok(())
    }
}

#[async_trait]
impl LifecycleHooks for InterceptionController {
    /// Pre-populate the static partition. Any failure makes this instance
    /// redundant; a previously active controller stays in charge.
    async fn on_install(&self) -> Result<()> {
        {
            let state = self.state.read().await;
            if *state != ControllerState::Installing {
                return Err(OfflineError::InvalidTransition {
                    action: "install".to_string(),
                    state: state.to_string(),
                });
            }
        }

        if let Err(e) = self.populate_static().await {
            warn!("Install of controller {} failed: {}", self.config.version, e);
            self.set_state(ControllerState::Redundant).await;
            return Err(e);
        }

        self.transition(ControllerState::Installing, ControllerState::Waiting, "finish install")
            .await?;
        info!("Controller {} installed", self.config.version);

        if self.config.skip_waiting_on_install {
            if let Err(e) = self.platform.skip_waiting().await {
                warn!("Skip waiting failed, staying in waiting: {}", e);
            }
        }
        Ok(())
    }

    /// Purge partitions of other versions, then start serving
    async fn on_activate(&self) -> Result<InvalidationEvent> {
        self.transition(ControllerState::Waiting, ControllerState::Activating, "activate")
            .await?;

        let current = PartitionSet::new(self.config.designated_partitions());
        let event = match self.store.retain_partitions(&current).await {
            Ok(event) => event,
            Err(e) => {
                self.set_state(ControllerState::Waiting).await;
                return Err(e);
            }
        };
        if !event.is_clean() {
            warn!("Stale partitions left behind: {:?}", event.failed);
        }

        if self.config.claim_on_activate {
            if let Err(e) = self.platform.claim_clients().await {
                warn!("Claiming clients failed: {}", e);
            }
        }

        self.transition(ControllerState::Activating, ControllerState::Active, "finish activation")
            .await?;
        info!(
            "Controller {} active ({} old partitions deleted)",
            self.config.version,
            event.partitions.len()
        );
        Ok(event)
    }

    async fn on_fetch(&self, request: InterceptedRequest) -> Result<FetchDisposition> {
        if !self.is_eligible(&request) {
            debug!("Passing through {} {}", request.method, request.url);
            return Ok(FetchDisposition::PassThrough(request));
        }

        let state = self.state().await;
        if state != ControllerState::Active {
            debug!(
                "Controller {} is {}, passing through {}",
                self.config.version, state, request.url
            );
            return Ok(FetchDisposition::PassThrough(request));
        }

        let response = self.engine.handle(request).await?;
        Ok(FetchDisposition::Respond(response))
    }

    async fn on_message(&self, payload: &serde_json::Value) -> Result<()> {
        match ControlMessage::parse(payload)? {
            ControlMessage::SkipWaiting => self.on_takeover_request().await,
        }
    }
}
