//! Stories and scenes.

use super::Procedure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of every result-backed scene key.
pub const SCENE_KEY_PREFIX: &str = "scene_";

/// Opaque unique identifier of a scene.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(String);

impl SceneId {
    /// Wraps an id string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One keyed visualization state with its description and build procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// Opaque unique id.
    pub id: SceneId,
    /// Stable key; `scene_<objectId>` for result-backed scenes.
    pub key: String,
    /// Short title.
    pub header: String,
    /// Markdown description.
    pub description: String,
    /// How the engine builds this scene.
    pub procedure: Procedure,
    /// How long the scene is shown during playback.
    pub linger_duration_ms: u64,
    /// Transition time into this scene.
    pub transition_duration_ms: u64,
}

/// Story metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    /// Display title.
    pub title: String,
    /// Query identifier the story was built for.
    pub query_id: String,
    /// Build time.
    pub created_at: DateTime<Utc>,
}

/// An ordered sequence of scenes for one query.
///
/// Stories are replaced wholesale, never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Metadata.
    pub metadata: StoryMetadata,
    /// Scenes in playback order.
    pub scenes: Vec<Scene>,
    /// Named binary assets referenced by scenes.
    #[serde(default)]
    pub assets: BTreeMap<String, Vec<u8>>,
}

impl Story {
    /// Returns the number of scenes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    /// Returns true if the story has no scenes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Returns the first scene's key.
    #[must_use]
    pub fn first_key(&self) -> Option<&str> {
        self.scenes.first().map(|scene| scene.key.as_str())
    }

    /// Returns true if a scene with the key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.scenes.iter().any(|scene| scene.key == key)
    }

    /// Returns the scene keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.scenes.iter().map(|scene| scene.key.as_str()).collect()
    }
}
