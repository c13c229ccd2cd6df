//! HTTP proxy host
//!
//! Runs the controller in front of one upstream origin. Every incoming
//! request is rewritten onto the upstream and dispatched as a `fetch` event;
//! pass-through requests go straight to the network.

use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::controller::InterceptionController;
use crate::error::OfflineError;
use crate::fetch::Fetcher;
use crate::http::{InterceptedRequest, Method, Response};
use crate::platform::{dispatch, EventReply, LifecycleEvent};

/// Headers scoped to a single connection; never forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Configuration for the proxy server
pub struct ProxyServerConfig {
    pub host: String,
    pub port: u16,
    /// Origin (and optional base path) requests are forwarded to
    pub upstream: Url,
}

/// Shared state of the proxy handlers
pub struct ProxyState {
    pub controller: Arc<InterceptionController>,
    pub fetcher: Arc<dyn Fetcher>,
    pub upstream: Url,
}

/// Proxy server
pub struct ProxyServer {
    config: ProxyServerConfig,
    controller: Arc<InterceptionController>,
    fetcher: Arc<dyn Fetcher>,
}

impl ProxyServer {
    pub fn new(
        config: ProxyServerConfig,
        controller: Arc<InterceptionController>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            controller,
            fetcher,
        }
    }

    /// Router with the control endpoints and the intercepting fallback
    pub fn router(&self) -> Router {
        let state = Arc::new(ProxyState {
            controller: self.controller.clone(),
            fetcher: self.fetcher.clone(),
            upstream: self.config.upstream.clone(),
        });

        Router::new()
            .route("/__offline/health", get(health_check))
            .route("/__offline/stats", get(stats))
            .route("/__offline/message", post(message))
            .fallback(intercept)
            .with_state(state)
    }

    /// Install and activate the controller, then serve until shutdown
    pub async fn start(self) -> Result<()> {
        match dispatch(self.controller.as_ref(), LifecycleEvent::Install).await {
            Ok(_) => {
                if let Err(e) = dispatch(self.controller.as_ref(), LifecycleEvent::Activate).await {
                    warn!("Activation failed, forwarding everything uncached: {}", e);
                }
            }
            Err(e) => warn!("Install failed, forwarding everything uncached: {}", e),
        }

        let app = self.router();
        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Proxying {} on {}", self.config.upstream, addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;

        self.controller.engine().settle().await;
        Ok(())
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub controller_version: String,
    pub state: String,
}

async fn health_check(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        controller_version: state.controller.config().version.clone(),
        state: state.controller.state().await.to_string(),
    })
}

async fn stats(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(state.controller.store().stats().await)
}

async fn message(
    State(state): State<Arc<ProxyState>>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    match dispatch(state.controller.as_ref(), LifecycleEvent::Message(payload)).await {
        Ok(_) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!("Control message failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn intercept(
    State(state): State<Arc<ProxyState>>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let request = match build_request(&state.upstream, &method, &uri, &headers, body) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let reply = dispatch(state.controller.as_ref(), LifecycleEvent::Fetch(request)).await;
    let result = match reply {
        Ok(EventReply::Respond(response)) => Ok(response),
        Ok(EventReply::PassThrough(request)) => state.fetcher.fetch(&request).await,
        Ok(EventReply::Done) => Err(OfflineError::Other("fetch event produced no response".into())),
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => into_http(response),
        Err(e) => {
            warn!("{} {} failed: {}", method, uri, e);
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

/// Rewrite `uri` onto the upstream, keeping any upstream base path
pub fn upstream_url(upstream: &Url, uri: &Uri) -> crate::error::Result<Url> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let base = upstream.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{}{}", base, path_and_query))?)
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn build_request(
    upstream: &Url,
    method: &axum::http::Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
) -> crate::error::Result<InterceptedRequest> {
    let method: Method = method.as_str().parse()?;
    let mut request = InterceptedRequest::new(method, upstream_url(upstream, uri)?);

    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            request.headers.push((name.as_str().to_string(), value.to_string()));
        }
    }
    if !body.is_empty() {
        request.body = body.to_vec();
    }
    Ok(request)
}

/// Convert a controller response into an axum response
pub fn into_http(response: Response) -> axum::response::Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|e| (StatusCode::BAD_GATEWAY, e.to_string()).into_response())
}
