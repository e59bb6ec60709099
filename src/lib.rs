//! # Foldscene
//!
//! Coordination layer between a queue-backed structural-alignment search
//! service and an external 3D visualization engine.
//!
//! Foldscene polls a slow search job until it produces a ranked list of
//! aligned structures, turns that list into an ordered story of keyed
//! scenes, and keeps the current search, the selected result and the
//! engine's active snapshot consistent while updates arrive out of order.
//!
//! ## Features
//!
//! - Retrying search client with bounded exponential backoff and progress reporting
//! - Deterministic story generation with structured visualization procedures
//! - FIFO operation queue guarding the (non-reentrant) visualization engine
//! - Copy-on-write state store with scoped subscriptions
//! - Debounced reconciliation of engine-originated scene changes
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use foldscene::search::PatternIdentifierResolver;
//! use foldscene::viewer::InMemoryEngine;
//! use foldscene::{FoldsceneConfig, SearchClient, SearchQuery, SearchType, SyncEngine};
//!
//! async fn run() -> foldscene::Result<()> {
//!     let config = FoldsceneConfig::load_default();
//!     let engine = SyncEngine::new(
//!         config.engine_config(),
//!         Arc::new(SearchClient::from_config(&config.search)),
//!         Arc::new(InMemoryEngine::new()),
//!         Arc::new(PatternIdentifierResolver::new()),
//!     );
//!     let outcome = engine
//!         .search(SearchQuery::new("1tup"), SearchType::Structure)
//!         .await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
// multiple_crate_versions is inherently crate-level (detects duplicate transitive dependencies).
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod config;
pub mod models;
pub mod observability;
pub mod search;
pub mod story;
pub mod sync;
pub mod viewer;

// Re-exports for convenience
pub use config::FoldsceneConfig;
pub use models::{
    IdentifierKind, ProgressInfo, ProgressStage, Scene, SceneId, SearchOptions, SearchQuery,
    SearchResult, SearchType, Story, StoryMetadata,
};
pub use search::{BackoffConfig, BackoffPoller, SearchClient, SearchObserver};
pub use story::{DuplicatePolicy, StoryBuilder, StoryOptions, build_story};
pub use sync::{EngineConfig, Subscription, SyncEngine, SyncState};
pub use viewer::{OperationQueue, SceneResolver, Snapshot, VisualizationEngine};

/// Error type for foldscene operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Validation` | Empty or unrecognized identifier, invalid query options |
/// | `SearchFailed` | The search service never produced a complete result list |
/// | `ExhaustedRetries` | A backoff poll spent its whole attempt budget |
/// | `Timeout` | The hard ceiling on a search elapsed |
/// | `Transport` | HTTP-level failure talking to the search service |
/// | `NoMappingFound` | A PDB entry has no linked UniProt accession |
/// | `EngineOperationFailed` | A queued visualization-engine call failed or panicked |
/// | `TimedOut` | A snapshot never registered within the bounded wait |
/// | `SceneNotFound` | A scene key is not part of the current story |
/// | `DuplicateSceneKey` | Two scenes in one story derived the same key |
/// | `OperationFailed` | Config, I/O or observability setup failed |
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// The user-supplied query is invalid.
    ///
    /// Raised when:
    /// - The identifier string is empty or whitespace
    /// - The identifier is neither a PDB id nor a UniProt accession
    /// - The result limit is zero
    #[error("validation failed: {0}")]
    Validation(String),

    /// The search service never returned a complete result list.
    #[error("search for '{query}' failed after {attempts} attempts: {reason}")]
    SearchFailed {
        /// The identifier that was searched.
        query: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last observed reason.
        reason: String,
    },

    /// A backoff poll exhausted its attempt budget.
    #[error("exhausted retries after {attempts} attempts: {last_reason}")]
    ExhaustedRetries {
        /// Number of attempts made.
        attempts: u32,
        /// Reason reported by the final attempt.
        last_reason: String,
    },

    /// An operation exceeded its hard time ceiling.
    #[error("operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// Ceiling that was exceeded, in milliseconds.
        elapsed_ms: u64,
    },

    /// HTTP-level failure.
    ///
    /// `status` is `None` for connection, DNS or body-read failures.
    #[error("transport error (status {status:?}): {message}")]
    Transport {
        /// HTTP status code, if a response was received.
        status: Option<u16>,
        /// Failure description.
        message: String,
    },

    /// The identifier resolver found no linkage for the input.
    #[error("no mapping found for '{0}'")]
    NoMappingFound(String),

    /// A queued visualization-engine operation failed.
    ///
    /// Raised when:
    /// - The engine returned an error from clear, load or apply
    /// - The operation panicked (isolated by the queue)
    /// - The queue worker has shut down
    #[error("engine operation '{operation}' failed: {cause}")]
    EngineOperationFailed {
        /// The engine operation.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// A snapshot was not registered within the bounded wait.
    #[error("snapshot '{key}' not registered after {attempts} attempts")]
    TimedOut {
        /// Snapshot key that was awaited.
        key: String,
        /// Number of lookups made.
        attempts: u32,
    },

    /// No scene with the given key exists in the story.
    #[error("scene not found: {0}")]
    SceneNotFound(String),

    /// Two scenes derived the same key.
    #[error("duplicate scene key: {0}")]
    DuplicateSceneKey(String),

    /// A supporting operation failed.
    ///
    /// Raised when:
    /// - A config file cannot be read or parsed
    /// - Observability was already initialized
    /// - A log file cannot be opened
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Returns true if the error is user-recoverable by editing the query or retrying.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::SearchFailed { .. }
                | Self::ExhaustedRetries { .. }
                | Self::Timeout { .. }
                | Self::Transport { .. }
                | Self::NoMappingFound(_)
        )
    }
}

/// Result type alias for foldscene operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("empty identifier".to_string());
        assert_eq!(err.to_string(), "validation failed: empty identifier");

        let err = Error::ExhaustedRetries {
            attempts: 3,
            last_reason: "queued".to_string(),
        };
        assert_eq!(err.to_string(), "exhausted retries after 3 attempts: queued");

        let err = Error::TimedOut {
            key: "scene_1abc".to_string(),
            attempts: 5,
        };
        assert_eq!(
            err.to_string(),
            "snapshot 'scene_1abc' not registered after 5 attempts"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Validation("x".into()).is_recoverable());
        assert!(Error::NoMappingFound("1abc".into()).is_recoverable());
        assert!(
            !Error::EngineOperationFailed {
                operation: "clear".into(),
                cause: "boom".into(),
            }
            .is_recoverable()
        );
        assert!(!Error::DuplicateSceneKey("scene_a".into()).is_recoverable());
    }
}
