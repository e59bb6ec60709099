//! The sync engine.
//!
//! Owns the [`SyncState`] store and is the only writer to it. Searches,
//! story loads, selections, viewer-originated scene changes and clears all
//! flow through here; every engine call goes through one [`OperationQueue`].

use super::debounce::Debouncer;
use super::state::SyncState;
use super::store::{Store, Subscription};
use crate::models::{
    EventMeta, IdentifierKind, ProgressInfo, SearchQuery, SearchResult, SearchType, Story,
    SyncEvent,
};
use crate::observability::{
    DEFAULT_EVENT_BUS_CAPACITY, EventBus, RequestContext, scope_request_context,
};
use crate::search::{Identifier, IdentifierResolver, SearchClient, SearchObserver};
use crate::story::{StoryBuilder, StoryOptions, scene_key};
use crate::viewer::{OperationQueue, SceneResolver, Snapshot, VisualizationEngine};
use crate::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

const EVENT_SOURCE: &str = "sync_engine";

/// Outcome future of a queued engine operation.
///
/// The operation is already enqueued when this is returned; awaiting it is
/// optional.
pub type EngineTask<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Quiet period before a viewer scene change is reconciled.
    pub debounce: Duration,
    /// Number of recent queries kept in history.
    pub history_limit: usize,
    /// Lookups before a snapshot wait gives up.
    pub snapshot_wait_attempts: u32,
    /// Delay between snapshot lookups.
    pub snapshot_wait_delay: Duration,
    /// Story generation options.
    pub story: StoryOptions,
    /// Capacity of the event bus.
    pub event_bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            history_limit: 10,
            snapshot_wait_attempts: 5,
            snapshot_wait_delay: Duration::from_millis(100),
            story: StoryOptions::default(),
            event_bus_capacity: DEFAULT_EVENT_BUS_CAPACITY,
        }
    }
}

/// How a call to [`SyncEngine::search`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// The query matched the current one; nothing was issued.
    Unchanged,
    /// Results were committed.
    Completed(usize),
    /// A newer request superseded this one; its results were discarded.
    Stale,
}

struct Inner {
    config: EngineConfig,
    store: Store<SyncState>,
    client: Arc<SearchClient>,
    viewer: Arc<dyn VisualizationEngine>,
    identifiers: Arc<dyn IdentifierResolver>,
    queue: OperationQueue,
    builder: StoryBuilder,
    scenes: SceneResolver,
    events: EventBus,
    debouncer: Debouncer<String>,
}

/// Keeps search state, the selected result and the engine's active scene
/// consistent.
///
/// Cloning is cheap; clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    /// Creates an engine.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        client: Arc<SearchClient>,
        viewer: Arc<dyn VisualizationEngine>,
        identifiers: Arc<dyn IdentifierResolver>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let debouncer = Debouncer::new(config.debounce, move |key: String| {
                if let Some(inner) = weak.upgrade() {
                    Self { inner }.apply_viewer_key(&key);
                }
            });
            Inner {
                store: Store::new(SyncState::default()),
                queue: OperationQueue::new(),
                builder: StoryBuilder::new(config.story.clone()),
                scenes: SceneResolver::new(config.snapshot_wait_attempts, config.snapshot_wait_delay),
                events: EventBus::new(config.event_bus_capacity),
                debouncer,
                client,
                viewer,
                identifiers,
                config,
            }
        });
        Self { inner }
    }

    /// Returns the current state snapshot.
    #[must_use]
    pub fn state(&self) -> Arc<SyncState> {
        self.inner.store.get()
    }

    /// Subscribes to every state replacement.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<L>(&self, listener: L) -> Subscription
    where
        L: Fn(&Arc<SyncState>) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(listener)
    }

    /// Subscribes to changes of one projected field.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_field<T, P, L>(&self, projection: P, listener: L) -> Subscription
    where
        T: PartialEq + Send + 'static,
        P: Fn(&SyncState) -> T + Send + Sync + 'static,
        L: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.store.subscribe_field(projection, listener)
    }

    /// Subscribes to engine events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the event bus.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Returns the engine settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Waits until every engine operation queued so far has finished.
    pub async fn flush(&self) {
        // A barrier never fails
        let _ = self.inner.queue.run("flush", || async { Ok(()) }).await;
    }

    /// Records a new query without issuing it.
    ///
    /// Returns false if the query is unchanged and idle.
    pub fn set_query(&self, query: SearchQuery, search_type: SearchType) -> bool {
        self.begin_query(query, search_type).is_some()
    }

    fn begin_query(&self, query: SearchQuery, search_type: SearchType) -> Option<u64> {
        let limit = self.inner.config.history_limit;
        transition(&self.inner.store, "set_query", |state| {
            state.with_query(query, search_type, limit)
        })
        .map(|state| state.request_token)
    }

    /// Commits results, builds their story and queues the story load.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSceneKey`] if the results produce a
    /// duplicate scene key under a rejecting policy. The error is also
    /// recorded as the validation error.
    pub fn set_results(&self, results: Vec<SearchResult>) -> Result<()> {
        self.commit_results(None, results).map(|_| ())
    }

    fn commit_results(&self, token: Option<u64>, results: Vec<SearchResult>) -> Result<bool> {
        let current = self.state();
        if token.is_some_and(|token| !current.is_current(token)) {
            return Ok(false);
        }
        let query_id = current
            .query
            .as_ref()
            .map(|query| query.identifier().to_string())
            .unwrap_or_default();

        let story = match self.inner.builder.build(&query_id, &results) {
            Ok(story) => Arc::new(story),
            Err(err) => {
                tracing::error!(error = %err, query = %query_id, "Story build rejected results");
                self.set_validation_error(Some(err.to_string()));
                return Err(err);
            },
        };

        let count = results.len();
        let committed = transition(&self.inner.store, "set_results", |state| {
            if token.is_some_and(|token| !state.is_current(token)) {
                return None;
            }
            Some(state.with_results(results, Arc::clone(&story)))
        });
        let Some(committed) = committed else {
            return Ok(false);
        };

        if token.is_some() {
            self.inner.events.publish(SyncEvent::SearchCompleted {
                meta: EventMeta::new(EVENT_SOURCE),
                token: committed.request_token,
                count,
            });
        }
        drop(self.load_story(story));
        Ok(true)
    }

    fn load_story(&self, story: Arc<Story>) -> EngineTask<bool> {
        let store = self.inner.store.clone();
        let scenes = self.inner.scenes;
        let events = self.inner.events.clone();
        let scene_count = story.len();

        self.enqueue(
            "load_snapshot_sequence",
            move |viewer| async move {
                if !is_current_story(&store, &story) {
                    tracing::debug!("Skipping load of superseded story");
                    return Ok(false);
                }
                viewer
                    .load_snapshot_sequence(&Snapshot::sequence(&story))
                    .await?;

                let active = store
                    .get()
                    .active_scene_key
                    .clone()
                    .filter(|key| story.contains_key(key));
                if let Some(key) = active {
                    scenes
                        .await_snapshot_registration(viewer.as_ref(), &key)
                        .await?;
                    viewer.apply_snapshot_by_key(&key).await?;
                }
                Ok(true)
            },
            move |outcome| {
                if matches!(outcome, Ok(true)) {
                    events.publish(SyncEvent::StoryLoaded {
                        meta: EventMeta::new(EVENT_SOURCE),
                        scenes: scene_count,
                    });
                }
            },
        )
    }

    /// Sets or clears the validation error.
    pub fn set_validation_error(&self, error: Option<String>) {
        transition(&self.inner.store, "set_validation_error", |state| {
            Some(state.with_validation_error(error))
        });
    }

    /// Records progress for the request `token`.
    ///
    /// Returns false, dropping the report, if a newer request exists.
    pub fn set_progress(&self, token: u64, progress: ProgressInfo) -> bool {
        let event_progress = progress.clone();
        let applied = transition(&self.inner.store, "set_progress", |state| {
            state
                .is_current(token)
                .then(|| state.with_progress(progress))
        })
        .is_some();
        if applied {
            self.inner.events.publish(SyncEvent::ProgressUpdated {
                meta: EventMeta::new(EVENT_SOURCE),
                token,
                progress: event_progress,
            });
        }
        applied
    }

    fn record_partial_results(&self, token: u64, count: usize) {
        if !self.state().is_current(token) {
            return;
        }
        transition(&self.inner.store, "partial_results", |state| {
            if state.is_current(token) {
                state.with_partial_count(count)
            } else {
                None
            }
        });
        self.inner.events.publish(SyncEvent::PartialResults {
            meta: EventMeta::new(EVENT_SOURCE),
            token,
            count,
        });
    }

    /// Selects a result and queues applying its scene.
    ///
    /// State changes immediately. The returned task resolves to false if a
    /// later selection superseded this one before the engine got to it.
    pub fn select_result(&self, result: &SearchResult) -> EngineTask<bool> {
        let key = scene_key(&result.object_id);
        let selected = result.clone();
        let state_key = key.clone();
        transition(&self.inner.store, "select_result", move |state| {
            Some(state.with_selection(selected, state_key))
        });

        let store = self.inner.store.clone();
        let scenes = self.inner.scenes;
        let events = self.inner.events.clone();
        let applied_key = key.clone();

        self.enqueue(
            "apply_snapshot_by_key",
            move |viewer| async move {
                if store.get().active_scene_key.as_deref() != Some(key.as_str()) {
                    tracing::debug!(key, "Skipping superseded selection");
                    return Ok(false);
                }
                scenes
                    .await_snapshot_registration(viewer.as_ref(), &key)
                    .await?;
                viewer.apply_snapshot_by_key(&key).await?;
                Ok(true)
            },
            move |outcome| {
                if matches!(outcome, Ok(true)) {
                    events.publish(SyncEvent::SceneApplied {
                        meta: EventMeta::new(EVENT_SOURCE),
                        key: applied_key,
                    });
                }
            },
        )
    }

    /// Reports a current-scene change observed in the engine.
    ///
    /// Bursts collapse into the last key; it is reconciled once the
    /// debounce window passes quietly. Must be called from within a tokio
    /// runtime.
    pub fn current_scene_changed(&self, key: impl Into<String>) {
        self.inner.debouncer.push(key.into());
    }

    /// Updates state from a settled viewer key. Never calls the engine.
    fn apply_viewer_key(&self, key: &str) -> bool {
        let changed = transition(&self.inner.store, "viewer_scene_changed", |state| {
            state.with_viewer_key(key)
        })
        .is_some();
        if !changed {
            tracing::trace!(key, "Ignoring viewer scene change");
        }
        changed
    }

    /// Forwards the engine's current-snapshot changes into
    /// [`current_scene_changed`](Self::current_scene_changed).
    ///
    /// The task ends when the engine's stream closes or the sync engine is
    /// dropped.
    pub fn attach_viewer(&self) -> JoinHandle<()> {
        let mut changes = self.inner.viewer.subscribe_current_changes();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(key) => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        Self { inner }.current_scene_changed(key);
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Viewer change stream lagged");
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Viewer change forwarding stopped");
        })
    }

    /// Clears the engine and then the state.
    ///
    /// The clear is requested at once: in-flight work becomes stale and
    /// viewer changes are ignored. State resets only when the engine
    /// acknowledges, and only if no newer request started meanwhile.
    pub fn clear(&self) -> EngineTask<()> {
        self.inner.debouncer.cancel();
        let token = transition(&self.inner.store, "clear_requested", |state| {
            Some(state.with_clear_requested())
        })
        .map_or(0, |state| state.request_token);

        let store = self.inner.store.clone();
        let events = self.inner.events.clone();
        self.enqueue(
            "clear",
            |viewer| async move { viewer.clear().await },
            move |outcome| {
                if outcome.is_ok() {
                    transition(&store, "clear_acknowledged", |state| {
                        Some(state.with_clear_acknowledged(token))
                    });
                    events.publish(SyncEvent::Cleared {
                        meta: EventMeta::new(EVENT_SOURCE),
                    });
                } else {
                    transition(&store, "clear_failed", |state| {
                        Some(state.with_clear_failed())
                    });
                }
            },
        )
    }

    /// Runs a search end to end: resolve, poll, commit, load.
    ///
    /// # Errors
    ///
    /// Returns the validation or search error of the current request. Errors
    /// of superseded requests are swallowed and reported as
    /// [`SearchOutcome::Stale`].
    pub async fn search(&self, query: SearchQuery, search_type: SearchType) -> Result<SearchOutcome> {
        let Some(token) = self.begin_query(query.clone(), search_type) else {
            tracing::debug!(query = query.identifier(), "Query unchanged, not searching");
            return Ok(SearchOutcome::Unchanged);
        };

        let context = RequestContext::new();
        let span = tracing::info_span!(
            "sync.search",
            request_id = context.request_id(),
            token,
            query = query.identifier(),
            search_type = search_type.as_str(),
        );
        scope_request_context(context, self.run_search(token, query, search_type))
            .instrument(span)
            .await
    }

    async fn run_search(
        &self,
        token: u64,
        query: SearchQuery,
        search_type: SearchType,
    ) -> Result<SearchOutcome> {
        self.inner.events.publish(SyncEvent::SearchStarted {
            meta: EventMeta::new(EVENT_SOURCE),
            token,
            query: query.identifier().to_string(),
        });

        let resolved = match self.resolve_query(token, &query, search_type).await {
            Ok(resolved) => resolved,
            Err(err) => return self.fail_search(token, err),
        };

        let observer = TokenObserver {
            engine: self.clone(),
            token,
        };
        match self.inner.client.search(&resolved, &observer).await {
            Ok(results) => {
                let count = results.len();
                if self.commit_results(Some(token), results)? {
                    tracing::info!(count, "Search results committed");
                    Ok(SearchOutcome::Completed(count))
                } else {
                    tracing::debug!(count, "Discarding results of superseded search");
                    Ok(SearchOutcome::Stale)
                }
            },
            Err(err) => self.fail_search(token, err),
        }
    }

    /// Classifies the identifier and maps PDB ids for sequence searches.
    async fn resolve_query(
        &self,
        token: u64,
        query: &SearchQuery,
        search_type: SearchType,
    ) -> Result<SearchQuery> {
        transition(&self.inner.store, "validating", |state| {
            state
                .is_current(token)
                .then(|| state.with_validating(true))
        });

        let identifier = self.inner.identifiers.classify(query.identifier()).await;
        let (value, kind) = match (identifier, search_type) {
            (Identifier::Invalid, _) => {
                return Err(Error::Validation(format!(
                    "'{}' is neither a PDB id nor a UniProt accession",
                    query.identifier()
                )));
            },
            (Identifier::Pdb(pdb_id), SearchType::Sequence) => {
                let accessions = self.inner.identifiers.uniprot_for_pdb(&pdb_id).await?;
                let accession = accessions
                    .into_iter()
                    .next()
                    .ok_or(Error::NoMappingFound(pdb_id))?;
                (accession, IdentifierKind::Uniprot)
            },
            (Identifier::Pdb(id), SearchType::Structure) => (id, IdentifierKind::Pdb),
            (Identifier::Uniprot(id), _) => (id, IdentifierKind::Uniprot),
        };

        transition(&self.inner.store, "validated", |state| {
            state
                .is_current(token)
                .then(|| state.with_validating(false))
        });

        Ok(SearchQuery {
            options: query.options,
            ..SearchQuery::new(value).with_input_type(kind)
        })
    }

    fn fail_search(&self, token: u64, err: Error) -> Result<SearchOutcome> {
        let message = err.to_string();
        let applied = transition(&self.inner.store, "search_failed", |state| {
            state
                .is_current(token)
                .then(|| state.with_validation_error(Some(message.clone())))
        });
        if applied.is_none() {
            tracing::debug!(error = %err, "Discarding failure of superseded search");
            return Ok(SearchOutcome::Stale);
        }

        tracing::warn!(error = %err, "Search failed");
        self.inner.events.publish(SyncEvent::SearchFailed {
            meta: EventMeta::new(EVENT_SOURCE),
            token,
            error: message,
        });
        Err(err)
    }

    /// Enqueues an engine call; failures are published as events.
    fn enqueue<T, F, Fut, C>(&self, operation: &'static str, op: F, on_complete: C) -> EngineTask<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn VisualizationEngine>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: FnOnce(&Result<T>) + Send + 'static,
    {
        let viewer = Arc::clone(&self.inner.viewer);
        let events = self.inner.events.clone();
        Box::pin(self.inner.queue.run_with(
            operation,
            move || op(viewer),
            move |outcome| {
                if let Err(err) = outcome {
                    events.publish(SyncEvent::EngineOperationFailed {
                        meta: EventMeta::new(EVENT_SOURCE),
                        operation: operation.to_string(),
                        error: err.to_string(),
                    });
                }
                on_complete(outcome);
            },
        ))
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.inner.config)
            .field("pending_operations", &self.inner.queue.pending())
            .finish_non_exhaustive()
    }
}

/// Applies a named transition and counts it.
fn transition<F>(store: &Store<SyncState>, name: &'static str, f: F) -> Option<Arc<SyncState>>
where
    F: FnOnce(&SyncState) -> Option<SyncState>,
{
    let next = store.update(f);
    if next.is_some() {
        metrics::counter!("sync_transitions_total", "transition" => name).increment(1);
        tracing::trace!(transition = name, "State transition");
    }
    next
}

fn is_current_story(store: &Store<SyncState>, story: &Arc<Story>) -> bool {
    store
        .get()
        .story
        .as_ref()
        .is_some_and(|current| Arc::ptr_eq(current, story))
}

/// Routes client progress to the engine, tagged with its request token.
struct TokenObserver {
    engine: SyncEngine,
    token: u64,
}

impl SearchObserver for TokenObserver {
    fn on_progress(&self, progress: &ProgressInfo) {
        self.engine.set_progress(self.token, progress.clone());
    }

    fn on_partial_results(&self, results: &[SearchResult]) {
        self.engine.record_partial_results(self.token, results.len());
    }
}
