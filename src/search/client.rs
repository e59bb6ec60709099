//! Polling search client.

use super::backoff::{BackoffConfig, BackoffPoller, PollTick, Probe};
use super::transport::{HttpSearchTransport, SearchRequest, SearchResponse, SearchTransport};
use crate::config::SearchConfig;
use crate::models::{ProgressInfo, ProgressStage, SearchQuery, SearchResult};
use crate::{Error, Result};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Default hard ceiling on one search.
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives progress and intermediate results while a search polls.
///
/// Partial results are not authoritative: the job may still be running and
/// the final list can differ.
pub trait SearchObserver: Send + Sync {
    /// Called once per poll cycle, and once more on completion.
    fn on_progress(&self, _progress: &ProgressInfo) {}

    /// Called with each intermediate result list seen while the job still runs.
    fn on_partial_results(&self, _results: &[SearchResult]) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}

/// Classification of one service response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Waiting in the service queue.
    Queued(u32),
    /// Running, nothing to show yet.
    Pending,
    /// Results are present but the job still reports a queue position.
    Partial {
        /// Results seen so far.
        results: Vec<SearchResult>,
        /// Reported queue position.
        queue_position: u32,
    },
    /// Final results.
    Complete(Vec<SearchResult>),
}

impl PollOutcome {
    /// Classifies a service response.
    #[must_use]
    pub fn classify(response: SearchResponse) -> Self {
        let results = response.results.unwrap_or_default();
        match (results.is_empty(), response.queue_position) {
            (true, Some(position)) => Self::Queued(position),
            (true, None) => Self::Pending,
            (false, Some(queue_position)) => Self::Partial {
                results,
                queue_position,
            },
            (false, None) => Self::Complete(results),
        }
    }
}

/// Drops results whose scores fall outside their documented ranges.
fn retain_valid_scores(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let total = results.len();
    let valid: Vec<SearchResult> = results
        .into_iter()
        .filter(SearchResult::has_valid_scores)
        .collect();
    let dropped = total - valid.len();
    if dropped > 0 {
        metrics::counter!("search_invalid_results_total")
            .increment(u64::try_from(dropped).unwrap_or(u64::MAX));
        tracing::warn!(dropped, "Dropping results with out-of-range scores");
    }
    valid
}

/// Mutable per-search polling status shared by the probe and the tick handler.
#[derive(Debug)]
struct PollStatus {
    stage: ProgressStage,
    queue_position: Option<u32>,
    partial_results: Option<usize>,
    attempt: u32,
}

/// Client for the queue-backed structural search service.
pub struct SearchClient {
    transport: Arc<dyn SearchTransport>,
    poller: BackoffPoller,
    timeout: Duration,
}

impl SearchClient {
    /// Creates a client over the given transport.
    #[must_use]
    pub fn new(transport: Arc<dyn SearchTransport>, backoff: BackoffConfig) -> Self {
        Self {
            transport,
            poller: BackoffPoller::new(backoff),
            timeout: DEFAULT_SEARCH_TIMEOUT,
        }
    }

    /// Creates an HTTP client from configuration.
    #[must_use]
    pub fn from_config(config: &SearchConfig) -> Self {
        let transport = HttpSearchTransport::new(
            &config.base_url,
            Duration::from_millis(config.request_timeout_ms),
            Duration::from_millis(config.connect_timeout_ms),
        );
        Self::new(Arc::new(transport), config.backoff()).with_timeout(config.timeout())
    }

    /// Sets the hard ceiling on one search.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the backoff schedule.
    #[must_use]
    pub const fn backoff(&self) -> &BackoffConfig {
        self.poller.config()
    }

    /// Searches for structures aligned to the query identifier.
    ///
    /// Polls until the service returns a complete result list. Results keep
    /// the service's ranking order.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if the identifier is empty or the limit is zero
    /// - [`Error::SearchFailed`] if the attempt budget is spent
    /// - [`Error::Timeout`] if the hard ceiling elapses first
    pub async fn search(
        &self,
        query: &SearchQuery,
        observer: &dyn SearchObserver,
    ) -> Result<Vec<SearchResult>> {
        let identifier = query.identifier();
        if identifier.is_empty() {
            metrics::counter!("search_requests_total", "status" => "invalid").increment(1);
            return Err(Error::Validation("identifier must not be empty".to_string()));
        }
        if query.options.limit == 0 {
            metrics::counter!("search_requests_total", "status" => "invalid").increment(1);
            return Err(Error::Validation("limit must be at least 1".to_string()));
        }

        let request = SearchRequest {
            query: identifier.to_string(),
            limit: query.options.limit,
            superposition: query.options.superposition,
        };
        let span = tracing::info_span!(
            "search.request",
            query = %request.query,
            limit = request.limit,
            request_id = ?crate::observability::current_request_id()
        );
        self.run(request, observer).instrument(span).await
    }

    async fn run(
        &self,
        request: SearchRequest,
        observer: &dyn SearchObserver,
    ) -> Result<Vec<SearchResult>> {
        let start = Instant::now();

        let status = Mutex::new(PollStatus {
            stage: ProgressStage::Initializing,
            queue_position: None,
            partial_results: None,
            attempt: 0,
        });

        let outcome =
            tokio::time::timeout(self.timeout, self.poll(&request, &status, observer)).await;
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::histogram!("search_duration_ms").record(elapsed_ms as f64);

        let result = match outcome {
            Ok(Ok(results)) => {
                let results = retain_valid_scores(results);
                let status = status.lock().unwrap_or_else(PoisonError::into_inner);
                let progress = ProgressInfo::new(
                    ProgressStage::Completed,
                    status.attempt,
                    self.backoff().max_attempts,
                )
                .with_partial_results(Some(results.len()));
                drop(status);
                observer.on_progress(&progress);
                tracing::info!(count = results.len(), elapsed_ms, "Search completed");
                Ok(results)
            },
            Ok(Err(Error::ExhaustedRetries {
                attempts,
                last_reason,
            })) => Err(Error::SearchFailed {
                query: request.query.clone(),
                attempts,
                reason: last_reason,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(Error::Timeout {
                operation: "search".to_string(),
                elapsed_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        let label = match &result {
            Ok(_) => "success",
            Err(Error::Timeout { .. }) => "timeout",
            Err(_) => "failed",
        };
        metrics::counter!("search_requests_total", "status" => label).increment(1);
        if let Err(err) = &result {
            tracing::warn!(error = %err, elapsed_ms, "Search failed");
        }
        result
    }

    async fn poll(
        &self,
        request: &SearchRequest,
        status: &Mutex<PollStatus>,
        observer: &dyn SearchObserver,
    ) -> Result<Vec<SearchResult>> {
        let transport = &self.transport;

        let probe = |attempt: u32| async move {
            metrics::counter!("search_poll_attempts_total").increment(1);
            // Every HTTP or transport failure spends one attempt
            let response = match transport.fetch(request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "Search poll failed");
                    return Probe::Retryable(err.to_string());
                },
            };

            let outcome = PollOutcome::classify(response);
            let mut guard = status.lock().unwrap_or_else(PoisonError::into_inner);
            guard.attempt = attempt;
            match outcome {
                PollOutcome::Queued(position) => {
                    guard.stage = ProgressStage::Queued;
                    guard.queue_position = Some(position);
                    Probe::Retryable(format!("Queued at position {position}"))
                },
                PollOutcome::Pending => {
                    guard.stage = ProgressStage::Processing;
                    guard.queue_position = None;
                    Probe::Retryable("No results yet".to_string())
                },
                PollOutcome::Partial {
                    results,
                    queue_position,
                } => {
                    guard.stage = ProgressStage::Processing;
                    guard.queue_position = Some(queue_position);
                    guard.partial_results = Some(results.len());
                    drop(guard);
                    observer.on_partial_results(&results);
                    Probe::Retryable(format!("{} partial results", results.len()))
                },
                PollOutcome::Complete(results) => {
                    guard.partial_results = Some(results.len());
                    Probe::Success(results)
                },
            }
        };

        let on_tick = |tick: &PollTick| {
            let guard = status.lock().unwrap_or_else(PoisonError::into_inner);
            let progress = ProgressInfo::new(guard.stage, tick.attempt, tick.max_attempts)
                .with_queue_position(guard.queue_position)
                .with_partial_results(guard.partial_results);
            drop(guard);
            observer.on_progress(&progress);
        };

        self.poller.poll(probe, on_tick).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ScriptedTransport;

    #[derive(Default)]
    struct RecordingObserver {
        progress: Mutex<Vec<ProgressInfo>>,
        partials: Mutex<Vec<usize>>,
    }

    impl SearchObserver for RecordingObserver {
        fn on_progress(&self, progress: &ProgressInfo) {
            self.progress.lock().expect("lock").push(progress.clone());
        }

        fn on_partial_results(&self, results: &[SearchResult]) {
            self.partials.lock().expect("lock").push(results.len());
        }
    }

    fn result(id: &str) -> SearchResult {
        SearchResult::new(id, 1.0, 0.9, 0.95)
    }

    fn client(script: Vec<Result<SearchResponse>>) -> (SearchClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let client = SearchClient::new(transport.clone(), BackoffConfig::new(5, 100, 1_000));
        (client, transport)
    }

    #[test]
    fn test_classify_responses() {
        assert_eq!(
            PollOutcome::classify(SearchResponse::queued(3)),
            PollOutcome::Queued(3)
        );
        assert_eq!(
            PollOutcome::classify(SearchResponse::default()),
            PollOutcome::Pending
        );
        assert_eq!(
            PollOutcome::classify(SearchResponse::completed(vec![result("a")])),
            PollOutcome::Complete(vec![result("a")])
        );
        let partial = SearchResponse {
            queue_position: Some(1),
            ..SearchResponse::completed(vec![result("a")])
        };
        assert!(matches!(
            PollOutcome::classify(partial),
            PollOutcome::Partial { queue_position: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_then_results() {
        let (client, transport) = client(vec![
            Ok(SearchResponse::queued(2)),
            Ok(SearchResponse::pending()),
            Ok(SearchResponse::completed(vec![result("1abc"), result("2xyz")])),
        ]);
        let observer = RecordingObserver::default();
        let results = client
            .search(&SearchQuery::new("1tup"), &observer)
            .await
            .expect("search");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].object_id, "1abc");
        assert_eq!(transport.request_count(), 3);

        let progress = observer.progress.lock().expect("lock");
        let stages: Vec<_> = progress.iter().map(|p| p.stage).collect();
        assert_eq!(
            stages,
            vec![
                ProgressStage::Initializing,
                ProgressStage::Queued,
                ProgressStage::Processing,
                ProgressStage::Completed,
            ]
        );
        assert_eq!(progress[1].queue_position, Some(2));
        assert_eq!(progress[1].attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_results_are_reported_but_polling_continues() {
        let partial = SearchResponse {
            queue_position: Some(1),
            ..SearchResponse::completed(vec![result("1abc")])
        };
        let (client, transport) = client(vec![
            Ok(partial),
            Ok(SearchResponse::completed(vec![result("1abc"), result("2xyz")])),
        ]);
        let observer = RecordingObserver::default();
        let results = client
            .search(&SearchQuery::new("1tup"), &observer)
            .await
            .expect("search");
        assert_eq!(results.len(), 2);
        assert_eq!(transport.request_count(), 2);
        // The final list is returned, never reported as partial
        assert_eq!(*observer.partials.lock().expect("lock"), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_http_errors_then_success() {
        let (client, _) = client(vec![
            Err(Error::Transport {
                status: Some(503),
                message: "HTTP 503 response".into(),
            }),
            Ok(SearchResponse::completed(vec![result("1abc")])),
        ]);
        let results = client
            .search(&SearchQuery::new("1tup"), &NoopObserver)
            .await
            .expect("search");
        assert_eq!(results.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_retried() {
        let (client, transport) = client(vec![
            Err(Error::Transport {
                status: Some(404),
                message: "HTTP 404 response".into(),
            }),
            Ok(SearchResponse::completed(vec![result("2xyz")])),
        ]);
        let results = client
            .search(&SearchQuery::new("1tup"), &NoopObserver)
            .await
            .expect("search");
        assert_eq!(results, vec![result("2xyz")]);
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_client_error_exhausts_budget() {
        let (client, transport) = client(vec![Err(Error::Transport {
            status: Some(400),
            message: "HTTP 400 response".into(),
        })]);
        let err = client
            .search(&SearchQuery::new("1tup"), &NoopObserver)
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::SearchFailed { attempts: 5, .. }));
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_maps_to_search_failed() {
        let (client, transport) = client(vec![Ok(SearchResponse::pending())]);
        let err = client
            .search(&SearchQuery::new("1tup"), &NoopObserver)
            .await
            .expect_err("should fail");
        assert_eq!(
            err,
            Error::SearchFailed {
                query: "1tup".into(),
                attempts: 5,
                reason: "No results yet".into(),
            }
        );
        assert_eq!(transport.request_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_wins_over_attempt_budget() {
        let transport = Arc::new(ScriptedTransport::new([Ok(SearchResponse::pending())]));
        let client = SearchClient::new(transport, BackoffConfig::new(100, 1_000, 10_000))
            .with_timeout(Duration::from_secs(30));
        let err = client
            .search(&SearchQuery::new("1tup"), &NoopObserver)
            .await
            .expect_err("should time out");
        assert_eq!(
            err,
            Error::Timeout {
                operation: "search".into(),
                elapsed_ms: 30_000,
            }
        );
    }

    #[tokio::test]
    async fn test_out_of_range_scores_are_dropped() {
        let (client, _) = client(vec![Ok(SearchResponse::completed(vec![
            result("1abc"),
            SearchResult::new("2bad", -0.5, 0.9, 0.9),
            SearchResult::new("3bad", 1.0, 1.7, 0.9),
            result("4xyz"),
        ]))]);
        let observer = RecordingObserver::default();
        let results = client
            .search(&SearchQuery::new("1tup"), &observer)
            .await
            .expect("search");

        let ids: Vec<_> = results.iter().map(|r| r.object_id.as_str()).collect();
        assert_eq!(ids, vec!["1abc", "4xyz"]);
        let progress = observer.progress.lock().expect("lock");
        assert_eq!(progress.last().and_then(|p| p.partial_results_count), Some(2));
    }

    #[tokio::test]
    async fn test_empty_identifier_is_rejected_without_request() {
        let (client, transport) = client(vec![]);
        let err = client
            .search(&SearchQuery::new("   "), &NoopObserver)
            .await
            .expect_err("should fail");
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_request_carries_options() {
        let (client, transport) = client(vec![Ok(SearchResponse::completed(vec![result("a")]))]);
        let query = SearchQuery::new(" 1tup ")
            .with_limit(25)
            .with_superposition(false);
        client.search(&query, &NoopObserver).await.expect("search");
        let requests = transport.requests();
        assert_eq!(
            requests[0],
            SearchRequest {
                query: "1tup".into(),
                limit: 25,
                superposition: false,
            }
        );
    }
}
