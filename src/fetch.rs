//! Network access
//!
//! The revalidation engine never talks to the network directly; it goes
//! through a [`Fetcher`], so tests can substitute scripted responses.

use crate::error::{OfflineError, Result};
use crate::http::{InterceptedRequest, Method, Response};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Performs the network leg of a cycle
///
/// A response with an error status is still `Ok`; only transport-level
/// failures are `Err`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response>;
}

/// [`Fetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| OfflineError::NetworkFailure(e.to_string()))?;
        Ok(Self { client })
    }

    /// Fetcher whose client enforces a per-request timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OfflineError::NetworkFailure(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: &Method) -> Result<reqwest::Method> {
    reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|e| OfflineError::NetworkFailure(format!("invalid method {}: {}", method, e)))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<Response> {
        let mut builder = self
            .client
            .request(to_reqwest_method(&request.method)?, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| OfflineError::NetworkFailure(format!("{}: {}", request.url, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| OfflineError::NetworkFailure(e.to_string()))?
            .to_vec();

        debug!("Fetched {} {} -> {}", request.method, request.url, status);
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

/// Run `fetcher` with an optional upper bound on how long it may take
pub async fn fetch_with_timeout(
    fetcher: &dyn Fetcher,
    request: &InterceptedRequest,
    timeout: Option<Duration>,
) -> Result<Response> {
    match timeout {
        None => fetcher.fetch(request).await,
        Some(limit) => tokio::time::timeout(limit, fetcher.fetch(request))
            .await
            .map_err(|_| OfflineError::NetworkTimeout {
                timeout_ms: limit.as_millis() as u64,
                url: request.url.to_string(),
            })?,
    }
}
