//! Sync event types for observers and observability.

use super::ProgressInfo;
use crate::current_timestamp;
use crate::observability::current_request_id;
use uuid::Uuid;

/// Shared event metadata required for observability.
#[derive(Debug, Clone)]
pub struct EventMeta {
    /// Unique identifier for this event.
    pub event_id: String,
    /// Optional correlation identifier for request/trace linking.
    pub correlation_id: Option<String>,
    /// Event source component.
    pub source: &'static str,
    /// Timestamp (Unix epoch seconds).
    pub timestamp: u64,
}

impl EventMeta {
    /// Creates new event metadata using the current timestamp and request context.
    #[must_use]
    pub fn new(source: &'static str) -> Self {
        Self::with_timestamp(source, current_request_id(), current_timestamp())
    }

    /// Creates new event metadata with a specified timestamp.
    #[must_use]
    pub fn with_timestamp(
        source: &'static str,
        correlation_id: Option<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            correlation_id,
            source,
            timestamp,
        }
    }
}

/// Discrete events emitted by the sync engine.
///
/// These complement state subscriptions: state tells observers *what is*,
/// events tell them *what happened* (including things that never touch state,
/// such as engine failures and partial results).
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A search was started.
    SearchStarted {
        /// Event metadata.
        meta: EventMeta,
        /// Request token of the search.
        token: u64,
        /// Searched identifier.
        query: String,
    },
    /// Progress was reported for the current search.
    ProgressUpdated {
        /// Event metadata.
        meta: EventMeta,
        /// Request token of the search.
        token: u64,
        /// The progress report.
        progress: ProgressInfo,
    },
    /// Non-authoritative intermediate results were observed.
    PartialResults {
        /// Event metadata.
        meta: EventMeta,
        /// Request token of the search.
        token: u64,
        /// Number of results seen.
        count: usize,
    },
    /// A search completed and its results were committed.
    SearchCompleted {
        /// Event metadata.
        meta: EventMeta,
        /// Request token of the search.
        token: u64,
        /// Number of results committed.
        count: usize,
    },
    /// A search failed or was rejected.
    SearchFailed {
        /// Event metadata.
        meta: EventMeta,
        /// Request token of the search.
        token: u64,
        /// Failure description.
        error: String,
    },
    /// A story was loaded into the visualization engine.
    StoryLoaded {
        /// Event metadata.
        meta: EventMeta,
        /// Number of snapshots loaded.
        scenes: usize,
    },
    /// A snapshot was applied in the visualization engine.
    SceneApplied {
        /// Event metadata.
        meta: EventMeta,
        /// Applied scene key.
        key: String,
    },
    /// A queued engine operation failed; application state is untouched.
    EngineOperationFailed {
        /// Event metadata.
        meta: EventMeta,
        /// The engine operation.
        operation: String,
        /// Failure description.
        error: String,
    },
    /// The engine and state were cleared.
    Cleared {
        /// Event metadata.
        meta: EventMeta,
    },
}

impl SyncEvent {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SearchStarted { .. } => "search_started",
            Self::ProgressUpdated { .. } => "progress_updated",
            Self::PartialResults { .. } => "partial_results",
            Self::SearchCompleted { .. } => "search_completed",
            Self::SearchFailed { .. } => "search_failed",
            Self::StoryLoaded { .. } => "story_loaded",
            Self::SceneApplied { .. } => "scene_applied",
            Self::EngineOperationFailed { .. } => "engine_operation_failed",
            Self::Cleared { .. } => "cleared",
        }
    }

    /// Returns the shared event metadata.
    #[must_use]
    pub const fn meta(&self) -> &EventMeta {
        match self {
            Self::SearchStarted { meta, .. }
            | Self::ProgressUpdated { meta, .. }
            | Self::PartialResults { meta, .. }
            | Self::SearchCompleted { meta, .. }
            | Self::SearchFailed { meta, .. }
            | Self::StoryLoaded { meta, .. }
            | Self::SceneApplied { meta, .. }
            | Self::EngineOperationFailed { meta, .. }
            | Self::Cleared { meta } => meta,
        }
    }
}
