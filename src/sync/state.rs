//! Application state and its pure transitions.
//!
//! Every transition takes the previous snapshot by reference and returns a
//! wholly new one (or `None` for a no-op), so observers never see a state
//! with only some of the related fields updated.

use crate::models::{ProgressInfo, SearchQuery, SearchResult, SearchType, Story};
use crate::viewer::SceneResolver;
use std::collections::VecDeque;
use std::sync::Arc;

/// State owned by the sync engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncState {
    /// Most recent query.
    pub query: Option<SearchQuery>,
    /// Search type of the most recent query.
    pub search_type: SearchType,
    /// User-visible error for the most recent query.
    pub validation_error: Option<String>,
    /// Whether the identifier is being resolved.
    pub is_validating: bool,
    /// Whether a search is in flight.
    pub is_searching: bool,
    /// Committed results, in service ranking order.
    pub results: Vec<SearchResult>,
    /// Latest progress report for the in-flight search.
    pub progress: Option<ProgressInfo>,
    /// Selected result.
    pub selected_result: Option<SearchResult>,
    /// Current story.
    pub story: Option<Arc<Story>>,
    /// Key of the active scene.
    pub active_scene_key: Option<String>,
    /// Whether an engine clear has been requested but not acknowledged.
    pub pending_clear: bool,
    /// Monotonic token of the latest request; stale work compares against it.
    pub request_token: u64,
    /// Recent queries, newest first.
    pub history: VecDeque<SearchQuery>,
}

impl SyncState {
    /// Returns true if `token` is the latest request token.
    #[must_use]
    pub const fn is_current(&self, token: u64) -> bool {
        self.request_token == token
    }

    /// Starts a new query.
    ///
    /// Returns `None` when the query and type match the current ones, there
    /// is no error, and no search is running.
    #[must_use]
    pub fn with_query(
        &self,
        query: SearchQuery,
        search_type: SearchType,
        history_limit: usize,
    ) -> Option<Self> {
        let unchanged = self.query.as_ref() == Some(&query)
            && self.search_type == search_type
            && self.validation_error.is_none()
            && !self.is_searching;
        if unchanged {
            return None;
        }

        let mut history = self.history.clone();
        history.retain(|previous| previous.identifier() != query.identifier());
        history.push_front(query.clone());
        history.truncate(history_limit.max(1));

        Some(Self {
            query: Some(query),
            search_type,
            validation_error: None,
            is_validating: false,
            is_searching: true,
            progress: None,
            request_token: self.request_token.wrapping_add(1),
            history,
            ..self.clone()
        })
    }

    /// Marks identifier resolution as running or finished.
    #[must_use]
    pub fn with_validating(&self, validating: bool) -> Self {
        Self {
            is_validating: validating,
            ..self.clone()
        }
    }

    /// Commits results and their story.
    ///
    /// The active scene is kept if the new story still contains it, otherwise
    /// it moves to the first scene.
    #[must_use]
    pub fn with_results(&self, results: Vec<SearchResult>, story: Arc<Story>) -> Self {
        let active_scene_key = self
            .active_scene_key
            .as_ref()
            .filter(|key| story.contains_key(key))
            .cloned()
            .or_else(|| story.first_key().map(str::to_string));
        let selected_result = active_scene_key
            .as_deref()
            .and_then(|key| SceneResolver::find_result(&results, key))
            .cloned();

        Self {
            results,
            story: Some(story),
            active_scene_key,
            selected_result,
            is_searching: false,
            is_validating: false,
            progress: None,
            validation_error: None,
            ..self.clone()
        }
    }

    /// Sets or clears the validation error.
    ///
    /// Setting an error clears results, progress and selection in the same
    /// transition.
    #[must_use]
    pub fn with_validation_error(&self, error: Option<String>) -> Self {
        match error {
            Some(error) => Self {
                validation_error: Some(error),
                results: Vec::new(),
                progress: None,
                selected_result: None,
                is_searching: false,
                is_validating: false,
                ..self.clone()
            },
            None => Self {
                validation_error: None,
                ..self.clone()
            },
        }
    }

    /// Replaces the progress report.
    #[must_use]
    pub fn with_progress(&self, progress: ProgressInfo) -> Self {
        Self {
            progress: Some(progress),
            ..self.clone()
        }
    }

    /// Records a non-authoritative partial result count.
    ///
    /// Only the progress report changes; committed results are untouched.
    #[must_use]
    pub fn with_partial_count(&self, count: usize) -> Option<Self> {
        let progress = self.progress.clone()?;
        Some(Self {
            progress: Some(progress.with_partial_results(Some(count))),
            ..self.clone()
        })
    }

    /// Selects a result and its scene.
    #[must_use]
    pub fn with_selection(&self, result: SearchResult, key: String) -> Self {
        Self {
            selected_result: Some(result),
            active_scene_key: Some(key),
            ..self.clone()
        }
    }

    /// Applies a scene change reported by the viewer.
    ///
    /// Returns `None` if the key is already active, is not part of the
    /// current story, or a clear is pending.
    #[must_use]
    pub fn with_viewer_key(&self, key: &str) -> Option<Self> {
        if self.pending_clear || self.active_scene_key.as_deref() == Some(key) {
            return None;
        }
        if !self.story.as_ref().is_some_and(|story| story.contains_key(key)) {
            return None;
        }
        Some(Self {
            active_scene_key: Some(key.to_string()),
            selected_result: SceneResolver::find_result(&self.results, key).cloned(),
            ..self.clone()
        })
    }

    /// Requests an engine clear and invalidates in-flight work.
    #[must_use]
    pub fn with_clear_requested(&self) -> Self {
        Self {
            pending_clear: true,
            request_token: self.request_token.wrapping_add(1),
            ..self.clone()
        }
    }

    /// Applies a clear acknowledgment for the request `token`.
    ///
    /// Resets everything but history and search type if no newer request
    /// started meanwhile. Otherwise only the pending flag is dropped.
    #[must_use]
    pub fn with_clear_acknowledged(&self, token: u64) -> Self {
        if !self.is_current(token) {
            return Self {
                pending_clear: false,
                ..self.clone()
            };
        }
        Self {
            search_type: self.search_type,
            history: self.history.clone(),
            request_token: self.request_token,
            ..Self::default()
        }
    }

    /// Drops the pending-clear flag after a failed clear.
    #[must_use]
    pub fn with_clear_failed(&self) -> Self {
        Self {
            pending_clear: false,
            ..self.clone()
        }
    }
}
