//! Search service transport.
//!
//! [`SearchTransport`] abstracts a single request to the search service so the
//! polling logic in [`SearchClient`](super::SearchClient) can be exercised
//! without a network. [`HttpSearchTransport`] is the production implementation.

use crate::models::SearchResult;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Parameters of one search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Identifier to search for.
    pub query: String,
    /// Maximum number of results.
    pub limit: u32,
    /// Whether to request superposition transforms.
    pub superposition: bool,
}

/// Body returned by the search service.
///
/// Every field is optional: a queued job has only `queue_position`, a running
/// job may have an empty `results`, and a finished job has a populated list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    /// Ranked results, if any are available.
    #[serde(default)]
    pub results: Option<Vec<SearchResult>>,
    /// Position in the service queue while the job has not finished.
    #[serde(default)]
    pub queue_position: Option<u32>,
    /// Service-side search time in seconds.
    #[serde(default)]
    pub search_time: Option<f64>,
}

impl SearchResponse {
    /// Response for a job waiting in the queue.
    #[must_use]
    pub const fn queued(position: u32) -> Self {
        Self {
            results: None,
            queue_position: Some(position),
            search_time: None,
        }
    }

    /// Response for a running job with no results yet.
    #[must_use]
    pub const fn pending() -> Self {
        Self {
            results: Some(Vec::new()),
            queue_position: None,
            search_time: None,
        }
    }

    /// Response for a finished job.
    #[must_use]
    pub const fn completed(results: Vec<SearchResult>) -> Self {
        Self {
            results: Some(results),
            queue_position: None,
            search_time: None,
        }
    }
}

/// Issues single requests against the search service.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Performs one request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] for connection failures, non-2xx
    /// statuses, or undecodable bodies.
    async fn fetch(&self, request: &SearchRequest) -> Result<SearchResponse>;
}

/// HTTP transport using `reqwest`.
pub struct HttpSearchTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchTransport {
    /// Creates a transport for the service at `base_url`.
    ///
    /// Zero timeouts disable the corresponding limit.
    #[must_use]
    pub fn new(base_url: &str, request_timeout: Duration, connect_timeout: Duration) -> Self {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!("foldscene/{}", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4);
        if !request_timeout.is_zero() {
            builder = builder.timeout(request_timeout);
        }
        if !connect_timeout.is_zero() {
            builder = builder.connect_timeout(connect_timeout);
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
        }
    }

    /// Returns the full search endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Builds the query string parameters for a request.
    fn query_params(request: &SearchRequest) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("query", request.query.clone()),
            ("limit", request.limit.to_string()),
        ];
        if request.superposition {
            // The service expects the Python-style literal
            params.push(("superposition", "True".to_string()));
        }
        params
    }
}

#[async_trait]
impl SearchTransport for HttpSearchTransport {
    async fn fetch(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&Self::query_params(request))
            .send()
            .await
            .map_err(|e| Error::Transport {
                status: e.status().map(|s| s.as_u16()),
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                status: Some(status.as_u16()),
                message: format!("HTTP {} response", status.as_u16()),
            });
        }

        let body = response.bytes().await.map_err(|e| Error::Transport {
            status: None,
            message: format!("failed to read body: {e}"),
        })?;
        serde_json::from_slice(&body).map_err(|e| Error::Transport {
            status: None,
            message: format!("invalid response body: {e}"),
        })
    }
}

/// Transport that replays a fixed script of responses.
///
/// Once the script is exhausted the last entry repeats. Useful for tests and
/// offline demos.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<SearchResponse>>>,
    last: Mutex<Option<Result<SearchResponse>>>,
    requests: Mutex<Vec<SearchRequest>>,
    latency: Duration,
}

impl ScriptedTransport {
    /// Creates a transport replaying `script` in order.
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = Result<SearchResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Adds an artificial delay to every request.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Returns the requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of requests received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    fn next_response(&self) -> Result<SearchResponse> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        let mut last = self
            .last
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(response) = next {
            *last = Some(response.clone());
            return response;
        }
        last.clone().unwrap_or_else(|| {
            Err(Error::Transport {
                status: None,
                message: "empty script".to_string(),
            })
        })
    }
}

#[async_trait]
impl SearchTransport for ScriptedTransport {
    async fn fetch(&self, request: &SearchRequest) -> Result<SearchResponse> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(request.clone());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_response()
    }
}
