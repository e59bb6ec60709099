//! Visualization engine boundary.
//!
//! The engine is an external, non-reentrant renderer. Foldscene never draws
//! anything itself: it issues `clear`, `load_snapshot_sequence` and
//! `apply_snapshot_by_key`, and listens to the engine's
//! current-snapshot-changed stream. Every mutating call goes through the
//! [`OperationQueue`].

mod memory;
mod queue;
mod resolver;

pub use memory::InMemoryEngine;
pub use queue::OperationQueue;
pub use resolver::{SceneResolver, await_snapshot_registration};

use crate::Result;
use crate::models::{Procedure, Scene, SceneId, Story};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Engine-side materialization of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Scene key.
    pub key: String,
    /// Scene id.
    pub scene_id: SceneId,
    /// Scene header.
    pub header: String,
    /// Build procedure.
    pub procedure: Procedure,
    /// Playback linger time.
    pub linger_duration_ms: u64,
    /// Playback transition time.
    pub transition_duration_ms: u64,
}

impl Snapshot {
    /// Creates the snapshot for a scene.
    #[must_use]
    pub fn from_scene(scene: &Scene) -> Self {
        Self {
            key: scene.key.clone(),
            scene_id: scene.id.clone(),
            header: scene.header.clone(),
            procedure: scene.procedure.clone(),
            linger_duration_ms: scene.linger_duration_ms,
            transition_duration_ms: scene.transition_duration_ms,
        }
    }

    /// Creates the snapshot sequence for a story, in scene order.
    #[must_use]
    pub fn sequence(story: &Story) -> Vec<Self> {
        story.scenes.iter().map(Self::from_scene).collect()
    }
}

/// External visualization engine.
///
/// Implementations need not be safe under concurrent mutation; callers
/// serialize mutating calls through an [`OperationQueue`].
#[async_trait]
pub trait VisualizationEngine: Send + Sync {
    /// Removes all loaded snapshots and structures.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the operation.
    async fn clear(&self) -> Result<()>;

    /// Replaces the loaded snapshot sequence.
    ///
    /// Snapshots may register asynchronously after this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the sequence.
    async fn load_snapshot_sequence(&self, snapshots: &[Snapshot]) -> Result<()>;

    /// Makes the snapshot with `key` current.
    ///
    /// # Errors
    ///
    /// Returns an error if no registered snapshot has that key.
    async fn apply_snapshot_by_key(&self, key: &str) -> Result<()>;

    /// Looks up a registered snapshot.
    async fn find_snapshot(&self, key: &str) -> Option<Snapshot>;

    /// Subscribes to current-snapshot changes, whatever their origin.
    fn subscribe_current_changes(&self) -> broadcast::Receiver<String>;
}
