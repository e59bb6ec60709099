//! Story construction from search results.

use super::description::alignment_description;
use super::procedure::alignment_procedure;
use crate::models::{
    SCENE_KEY_PREFIX, Scene, SceneId, SearchResult, Story, StoryMetadata, Transform,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};

/// Default linger time per scene.
pub const DEFAULT_LINGER_MS: u64 = 5_000;
/// Default transition time between scenes.
pub const DEFAULT_TRANSITION_MS: u64 = 1_000;

/// What to do when two scenes derive the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Fail with [`Error::DuplicateSceneKey`].
    Reject,
    /// Keep the first occurrence and drop later ones.
    KeepFirst,
}

impl Default for DuplicatePolicy {
    /// `Reject` in debug builds, `KeepFirst` in release builds.
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Reject
        } else {
            Self::KeepFirst
        }
    }
}

impl DuplicatePolicy {
    /// Returns the policy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::KeepFirst => "keep_first",
        }
    }

    /// Parses a policy name, falling back to the build default.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "reject" => Self::Reject,
            "keep_first" | "dedupe" => Self::KeepFirst,
            _ => Self::default(),
        }
    }
}

/// Story construction options.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryOptions {
    /// Linger time per result scene.
    pub linger_duration_ms: u64,
    /// Transition time into each result scene.
    pub transition_duration_ms: u64,
    /// Duplicate key handling.
    pub duplicate_policy: DuplicatePolicy,
    /// Hand-written scenes appended after the result scenes.
    pub authored_scenes: Vec<Scene>,
}

impl Default for StoryOptions {
    fn default() -> Self {
        Self {
            linger_duration_ms: DEFAULT_LINGER_MS,
            transition_duration_ms: DEFAULT_TRANSITION_MS,
            duplicate_policy: DuplicatePolicy::default(),
            authored_scenes: Vec::new(),
        }
    }
}

impl StoryOptions {
    /// Sets the duplicate policy.
    #[must_use]
    pub const fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Appends an authored scene.
    #[must_use]
    pub fn with_authored_scene(mut self, scene: Scene) -> Self {
        self.authored_scenes.push(scene);
        self
    }
}

/// Returns the scene key for a result object id.
#[must_use]
pub fn scene_key(object_id: &str) -> String {
    format!("{SCENE_KEY_PREFIX}{object_id}")
}

/// Derives a stable scene id from the query and scene key.
#[must_use]
pub fn scene_id(query_id: &str, key: &str) -> SceneId {
    let mut hasher = Sha256::new();
    hasher.update(query_id.trim().to_lowercase().as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    SceneId::new(&digest[..16])
}

/// Builds stories from ranked results.
///
/// Building is deterministic: the same query and results always produce the
/// same scene keys, ids and order. Only `metadata.created_at` varies.
#[derive(Debug, Clone, Default)]
pub struct StoryBuilder {
    options: StoryOptions,
}

impl StoryBuilder {
    /// Creates a builder with the given options.
    #[must_use]
    pub const fn new(options: StoryOptions) -> Self {
        Self { options }
    }

    /// Returns the options.
    #[must_use]
    pub const fn options(&self) -> &StoryOptions {
        &self.options
    }

    /// Builds a story with one scene per result, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSceneKey`] if two scenes share a key and the
    /// policy is [`DuplicatePolicy::Reject`].
    pub fn build(&self, query_id: &str, results: &[SearchResult]) -> Result<Story> {
        let mut seen = HashSet::with_capacity(results.len());
        let mut scenes = Vec::with_capacity(results.len() + self.options.authored_scenes.len());

        for result in results {
            let key = scene_key(&result.object_id);
            if !self.admit(&mut seen, &key)? {
                continue;
            }
            let transform = match (result.rotation_matrix, result.translation_vector) {
                (Some(rotation), translation) => Some(Transform::from_row_major(
                    rotation,
                    translation.unwrap_or([0.0; 3]),
                )),
                (None, Some(_)) => {
                    tracing::debug!(
                        object_id = %result.object_id,
                        "Ignoring translation without a rotation matrix"
                    );
                    None
                },
                (None, None) => None,
            };
            scenes.push(Scene {
                id: scene_id(query_id, &key),
                header: format!("Alignment {}", scenes.len() + 1),
                description: alignment_description(query_id, result),
                procedure: alignment_procedure(query_id, &result.object_id, transform),
                linger_duration_ms: self.options.linger_duration_ms,
                transition_duration_ms: self.options.transition_duration_ms,
                key,
            });
        }

        for scene in &self.options.authored_scenes {
            if self.admit(&mut seen, &scene.key)? {
                scenes.push(scene.clone());
            }
        }

        tracing::debug!(query = query_id, scenes = scenes.len(), "Built story");
        Ok(Story {
            metadata: StoryMetadata {
                title: format!("Structural alignments for {}", query_id.trim().to_uppercase()),
                query_id: query_id.trim().to_string(),
                created_at: chrono::Utc::now(),
            },
            scenes,
            assets: BTreeMap::new(),
        })
    }

    /// Records a key, returning false if a duplicate should be skipped.
    fn admit(&self, seen: &mut HashSet<String>, key: &str) -> Result<bool> {
        if seen.insert(key.to_string()) {
            return Ok(true);
        }
        match self.options.duplicate_policy {
            DuplicatePolicy::Reject => Err(Error::DuplicateSceneKey(key.to_string())),
            DuplicatePolicy::KeepFirst => {
                tracing::warn!(key, "Dropping scene with duplicate key");
                metrics::counter!("story_duplicate_scenes_total").increment(1);
                Ok(false)
            },
        }
    }
}

/// Builds a story with default options.
///
/// # Errors
///
/// Returns [`Error::DuplicateSceneKey`] on duplicate object ids in debug builds.
pub fn build_story(query_id: &str, results: &[SearchResult]) -> Result<Story> {
    StoryBuilder::default().build(query_id, results)
}
