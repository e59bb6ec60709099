//! Property-based tests for scheduling, story generation and state transitions.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Backoff delays are bounded and non-decreasing
//! - Story generation is deterministic and keeps ranking order
//! - Scene keys map back to their results
//! - History stays bounded and duplicate-free
//! - Viewer keys outside the story never become active

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use foldscene::search::{Identifier, classify_identifier};
use foldscene::story::scene_key;
use foldscene::sync::SyncState;
use foldscene::{
    BackoffConfig, DuplicatePolicy, SceneResolver, SearchQuery, SearchResult, SearchType,
    StoryBuilder, StoryOptions,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn result_strategy() -> impl Strategy<Value = SearchResult> {
    (
        "[0-9][a-z0-9]{3}(_[A-Z])?",
        0.0f64..10.0,
        0.0f64..=1.0,
        0.0f64..=1.0,
    )
        .prop_map(|(id, rmsd, tm, aligned)| SearchResult::new(id, rmsd, tm, aligned))
}

fn keep_first() -> StoryBuilder {
    StoryBuilder::new(StoryOptions::default().with_duplicate_policy(DuplicatePolicy::KeepFirst))
}

// ============================================================================
// Backoff Scheduling
// ============================================================================

proptest! {
    /// Property: delays never exceed the maximum and never decrease.
    #[test]
    fn prop_backoff_delays_bounded_and_monotonic(
        initial in 1u64..5_000,
        max in 1u64..60_000,
        multiplier in 1u32..5,
        attempts in 1u32..40
    ) {
        let config = BackoffConfig::new(attempts, initial, max).with_multiplier(multiplier);
        let mut previous = 0;
        for attempt in 1..=attempts {
            let delay = config.delay_for_attempt(attempt);
            prop_assert!(delay <= max);
            prop_assert!(delay >= previous);
            previous = delay;
        }
    }

    /// Property: the schedule has one delay between each pair of attempts.
    #[test]
    fn prop_schedule_length(attempts in 1u32..30) {
        let config = BackoffConfig::new(attempts, 100, 1_000);
        prop_assert_eq!(config.schedule().len(), (attempts - 1) as usize);
    }
}

// ============================================================================
// Story Generation
// ============================================================================

proptest! {
    /// Property: one scene per unique result, in input order.
    #[test]
    fn prop_story_keeps_ranking_order(results in prop::collection::vec(result_strategy(), 0..20)) {
        let story = keep_first().build("1tup", &results).expect("keep-first never fails");

        let mut seen = HashSet::new();
        let expected: Vec<String> = results
            .iter()
            .filter(|r| seen.insert(r.object_id.clone()))
            .map(|r| scene_key(&r.object_id))
            .collect();
        let keys: Vec<String> = story.scenes.iter().map(|s| s.key.clone()).collect();
        prop_assert_eq!(keys, expected);
    }

    /// Property: scene ids and keys are stable across builds.
    #[test]
    fn prop_story_is_deterministic(results in prop::collection::vec(result_strategy(), 1..10)) {
        let first = keep_first().build("1tup", &results).expect("build");
        let second = keep_first().build("1tup", &results).expect("build");
        prop_assert_eq!(first.scenes, second.scenes);
    }

    /// Property: every scene key resolves back to its result.
    #[test]
    fn prop_scene_key_resolves_to_result(results in prop::collection::vec(result_strategy(), 1..10)) {
        let story = keep_first().build("1tup", &results).expect("build");
        for scene in &story.scenes {
            let result = SceneResolver::find_result(&results, &scene.key).expect("result");
            prop_assert_eq!(scene_key(&result.object_id), scene.key.clone());
            prop_assert!(SceneResolver::find_scene(&story, &scene.key).is_ok());
        }
    }
}

// ============================================================================
// Identifier Classification
// ============================================================================

proptest! {
    /// Property: PDB ids are recognized in any case and normalized to lowercase.
    #[test]
    fn prop_pdb_ids_normalize(id in "[0-9][A-Za-z0-9]{3}") {
        prop_assert_eq!(classify_identifier(&id), Identifier::Pdb(id.to_lowercase()));
        prop_assert_eq!(
            classify_identifier(&format!("  {id} ")),
            Identifier::Pdb(id.to_lowercase())
        );
    }

    /// Property: inputs containing punctuation are never valid identifiers.
    #[test]
    fn prop_punctuation_is_invalid(id in "[A-Z0-9]{2,4}[-.!/][A-Z0-9]{1,4}") {
        prop_assert_eq!(classify_identifier(&id), Identifier::Invalid);
    }
}

// ============================================================================
// State Transitions
// ============================================================================

proptest! {
    /// Property: history is bounded, newest first and duplicate-free.
    #[test]
    fn prop_history_bounded_and_unique(
        ids in prop::collection::vec("[0-9][a-z]{3}", 1..30),
        limit in 1usize..8
    ) {
        let mut state = SyncState::default();
        let mut last_token = state.request_token;
        for id in &ids {
            if let Some(next) = state.with_query(SearchQuery::new(id.as_str()), SearchType::Structure, limit) {
                prop_assert!(next.request_token > last_token);
                last_token = next.request_token;
                state = next;
            }
        }

        prop_assert!(state.history.len() <= limit);
        let unique: HashSet<_> = state.history.iter().map(SearchQuery::identifier).collect();
        prop_assert_eq!(unique.len(), state.history.len());
        prop_assert_eq!(
            state.history.front().map(SearchQuery::identifier),
            ids.last().map(String::as_str)
        );
    }

    /// Property: the active key always belongs to the current story.
    #[test]
    fn prop_active_key_stays_in_story(
        results in prop::collection::vec(result_strategy(), 1..8),
        probes in prop::collection::vec("scene_[0-9][a-z0-9]{3}|[a-z]{4}", 0..20)
    ) {
        let story = Arc::new(keep_first().build("1tup", &results).expect("build"));
        let mut state = SyncState::default().with_results(results, Arc::clone(&story));
        for key in &probes {
            if let Some(next) = state.with_viewer_key(key) {
                state = next;
            }
            let active = state.active_scene_key.clone().expect("active key");
            prop_assert!(story.contains_key(&active));
        }
    }
}
