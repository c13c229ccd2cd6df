//! Host platform boundary
//!
//! The host delivers lifecycle events (`install`, `activate`, `fetch`,
//! `message`) and offers two primitives back: skip the waiting phase and
//! claim existing clients. [`dispatch`] is the adapter between the two: the
//! host must await the returned future before finalizing the event.

use crate::controller::{FetchDisposition, LifecycleHooks};
use crate::error::{OfflineError, Result};
use crate::http::{InterceptedRequest, Response};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Lifecycle primitives provided by the host
#[async_trait]
pub trait Platform: Send + Sync {
    /// Let a waiting controller take over without a staged rollout
    async fn skip_waiting(&self) -> Result<()>;

    /// Start controlling clients that loaded under a previous controller
    async fn claim_clients(&self) -> Result<()>;
}

/// Platform for a single in-process controller: both primitives succeed
/// immediately and are counted
#[derive(Debug, Default)]
pub struct StandalonePlatform {
    skip_waiting_calls: AtomicU64,
    claim_calls: AtomicU64,
}

impl StandalonePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_waiting_calls(&self) -> u64 {
        self.skip_waiting_calls.load(Ordering::Relaxed)
    }

    pub fn claim_calls(&self) -> u64 {
        self.claim_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Platform for StandalonePlatform {
    async fn skip_waiting(&self) -> Result<()> {
        self.skip_waiting_calls.fetch_add(1, Ordering::Relaxed);
        info!("Skip waiting requested");
        Ok(())
    }

    async fn claim_clients(&self) -> Result<()> {
        self.claim_calls.fetch_add(1, Ordering::Relaxed);
        info!("Claiming clients");
        Ok(())
    }
}

/// Control instruction carried by a `message` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Take over immediately
    SkipWaiting,
}

impl ControlMessage {
    /// Parse a message payload such as `{"type": "SKIP_WAITING"}`
    pub fn parse(payload: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| OfflineError::LifecycleSignal(format!("{}: {}", payload, e)))
    }
}

/// An event delivered by the host
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Install,
    Activate,
    Fetch(InterceptedRequest),
    Message(serde_json::Value),
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Install => "install",
            LifecycleEvent::Activate => "activate",
            LifecycleEvent::Fetch(_) => "fetch",
            LifecycleEvent::Message(_) => "message",
        }
    }
}

/// What the host should do once the event's work is complete
#[derive(Debug)]
pub enum EventReply {
    /// Lifecycle work finished
    Done,
    /// Answer the intercepted request with this response
    Respond(Response),
    /// Let the host's default network handling take the request
    PassThrough(InterceptedRequest),
}

/// Route an event to the controller
///
/// The future completes only when all of the event's work is done, which is
/// the "extend the event's lifetime" contract. Malformed messages are
/// dropped here and never reach the host as errors.
pub async fn dispatch(hooks: &dyn LifecycleHooks, event: LifecycleEvent) -> Result<EventReply> {
    debug!("Dispatching {} event", event.name());
    match event {
        LifecycleEvent::Install => {
            hooks.on_install().await?;
            Ok(EventReply::Done)
        }
        LifecycleEvent::Activate => {
            hooks.on_activate().await?;
            Ok(EventReply::Done)
        }
        LifecycleEvent::Fetch(request) => match hooks.on_fetch(request).await? {
            FetchDisposition::Respond(response) => Ok(EventReply::Respond(response)),
            FetchDisposition::PassThrough(request) => Ok(EventReply::PassThrough(request)),
        },
        LifecycleEvent::Message(payload) => {
            match hooks.on_message(&payload).await {
                Ok(()) => {}
                Err(OfflineError::LifecycleSignal(reason)) => {
                    debug!("Ignoring control message: {}", reason);
                }
                Err(e) => return Err(e),
            }
            Ok(EventReply::Done)
        }
    }
}
