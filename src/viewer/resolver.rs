//! Mapping between results, scene keys and engine snapshots.

use super::{Snapshot, VisualizationEngine};
use crate::models::{SCENE_KEY_PREFIX, Scene, SearchResult, Story};
use crate::search::{BackoffConfig, BackoffPoller, Probe};
use crate::{Error, Result};
use std::time::Duration;

/// Default number of lookups while waiting for a snapshot to register.
pub const DEFAULT_WAIT_ATTEMPTS: u32 = 5;
/// Default delay between lookups.
pub const DEFAULT_WAIT_DELAY: Duration = Duration::from_millis(100);

/// Resolves scene keys in both directions and waits for snapshot registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneResolver {
    max_attempts: u32,
    delay: Duration,
}

impl Default for SceneResolver {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_ATTEMPTS, DEFAULT_WAIT_DELAY)
    }
}

impl SceneResolver {
    /// Creates a resolver with the given registration wait bounds.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 { 1 } else { max_attempts },
            delay,
        }
    }

    /// Returns the scene key for a result object id.
    #[must_use]
    pub fn scene_key(object_id: &str) -> String {
        crate::story::scene_key(object_id)
    }

    /// Returns the object id encoded in a result-backed scene key.
    #[must_use]
    pub fn object_id_from_key(key: &str) -> Option<&str> {
        key.strip_prefix(SCENE_KEY_PREFIX)
            .filter(|object_id| !object_id.is_empty())
    }

    /// Finds a scene by key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SceneNotFound`] if the story has no scene with that key.
    pub fn find_scene<'a>(story: &'a Story, key: &str) -> Result<&'a Scene> {
        story
            .scenes
            .iter()
            .find(|scene| scene.key == key)
            .ok_or_else(|| Error::SceneNotFound(key.to_string()))
    }

    /// Finds the result a scene key was derived from.
    #[must_use]
    pub fn find_result<'a>(results: &'a [SearchResult], key: &str) -> Option<&'a SearchResult> {
        let object_id = Self::object_id_from_key(key)?;
        results.iter().find(|result| result.object_id == object_id)
    }

    /// Waits for the engine to register the snapshot with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimedOut`] after the configured number of lookups.
    pub async fn await_snapshot_registration(
        &self,
        engine: &dyn VisualizationEngine,
        key: &str,
    ) -> Result<Snapshot> {
        await_snapshot_registration(engine, key, self.max_attempts, self.delay).await
    }
}

/// Polls `engine` for a snapshot, at most `max_attempts` times, `delay` apart.
///
/// Loading a story registers its snapshots asynchronously, so a selection
/// can race the load. The wait is always bounded.
///
/// # Errors
///
/// Returns [`Error::TimedOut`] if the snapshot never appears.
pub async fn await_snapshot_registration(
    engine: &dyn VisualizationEngine,
    key: &str,
    max_attempts: u32,
    delay: Duration,
) -> Result<Snapshot> {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let poller = BackoffPoller::new(BackoffConfig::new(max_attempts, delay_ms, delay_ms));

    let outcome = poller
        .poll(
            |_| async move {
                engine.find_snapshot(key).await.map_or_else(
                    || Probe::Retryable(format!("snapshot '{key}' not registered")),
                    Probe::Success,
                )
            },
            |tick| tracing::trace!(key, attempt = tick.attempt, "Waiting for snapshot"),
        )
        .await;

    match outcome {
        Err(Error::ExhaustedRetries { attempts, .. }) => {
            tracing::warn!(key, attempts, "Snapshot never registered");
            Err(Error::TimedOut {
                key: key.to_string(),
                attempts,
            })
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SearchResult;
    use crate::story::build_story;
    use crate::viewer::InMemoryEngine;

    fn story() -> (Story, Vec<SearchResult>) {
        let results = vec![
            SearchResult::new("2xyz", 1.0, 0.9, 0.9),
            SearchResult::new("AF-P04637-F1", 2.0, 0.7, 0.8),
        ];
        (build_story("1tup", &results).expect("build"), results)
    }

    #[test]
    fn test_find_scene_round_trip() {
        let (story, results) = story();
        let key = SceneResolver::scene_key(&results[0].object_id);
        let scene = SceneResolver::find_scene(&story, &key).expect("scene");
        assert!(scene.description.contains("2XYZ"));
    }

    #[test]
    fn test_find_scene_not_found() {
        let (story, _) = story();
        assert_eq!(
            SceneResolver::find_scene(&story, "scene_nope"),
            Err(Error::SceneNotFound("scene_nope".into()))
        );
    }

    #[test]
    fn test_reverse_mapping() {
        let (_, results) = story();
        assert_eq!(
            SceneResolver::object_id_from_key("scene_AF-P04637-F1"),
            Some("AF-P04637-F1")
        );
        assert_eq!(SceneResolver::object_id_from_key("intro"), None);
        assert_eq!(SceneResolver::object_id_from_key("scene_"), None);
        let found = SceneResolver::find_result(&results, "scene_AF-P04637-F1").expect("result");
        assert!((found.rmsd - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_succeeds_once_registered() {
        let (story, _) = story();
        let engine =
            InMemoryEngine::new().with_registration_delay(Duration::from_millis(250));
        engine
            .load_snapshot_sequence(&Snapshot::sequence(&story))
            .await
            .expect("load");

        let snapshot = SceneResolver::default()
            .await_snapshot_registration(&engine, "scene_2xyz")
            .await
            .expect("registered");
        assert_eq!(snapshot.key, "scene_2xyz");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_bounded() {
        let engine = InMemoryEngine::new();
        let start = tokio::time::Instant::now();
        let err = await_snapshot_registration(
            &engine,
            "scene_missing",
            5,
            Duration::from_millis(100),
        )
        .await
        .expect_err("never registers");
        assert_eq!(
            err,
            Error::TimedOut {
                key: "scene_missing".into(),
                attempts: 5,
            }
        );
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }
}
