//! `SyncEngine` integration tests.
//!
//! Drives the engine through full search cycles against scripted transports
//! and the in-memory visualization engine, focusing on:
//! - Stale responses and acknowledgments never overwriting newer state
//! - Snapshot registration racing story loads
//! - Engine calls never overlapping
//! - Viewer feedback loops being damped by the debounce window

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use foldscene::models::SyncEvent;
use foldscene::search::{PatternIdentifierResolver, ScriptedTransport, SearchResponse};
use foldscene::sync::SearchOutcome;
use foldscene::viewer::InMemoryEngine;
use foldscene::{
    BackoffConfig, DuplicatePolicy, EngineConfig, Error, ProgressInfo, ProgressStage, SearchClient,
    SearchQuery, SearchResult, SearchType, StoryOptions, SyncEngine,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

// ============================================================================
// Test Helpers
// ============================================================================

fn results(ids: &[&str]) -> Vec<SearchResult> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let rank = i as f64;
            SearchResult::new(*id, 1.0 + rank, 0.9 - rank / 10.0, 0.8)
        })
        .collect()
}

fn completed(ids: &[&str]) -> ScriptedTransport {
    ScriptedTransport::new([
        Ok(SearchResponse::queued(1)),
        Ok(SearchResponse::completed(results(ids))),
    ])
}

struct Harness {
    engine: SyncEngine,
    viewer: Arc<InMemoryEngine>,
    transport: Arc<ScriptedTransport>,
}

fn harness_with(transport: ScriptedTransport, viewer: InMemoryEngine, config: EngineConfig) -> Harness {
    let transport = Arc::new(transport);
    let viewer = Arc::new(viewer);
    let client = SearchClient::new(transport.clone(), BackoffConfig::new(4, 50, 50));
    let engine = SyncEngine::new(
        config,
        Arc::new(client),
        viewer.clone(),
        Arc::new(PatternIdentifierResolver::new().with_mapping("1tup", ["P04637"])),
    );
    Harness {
        engine,
        viewer,
        transport,
    }
}

fn harness(transport: ScriptedTransport) -> Harness {
    harness_with(transport, InMemoryEngine::new(), EngineConfig::default())
}

fn drain(events: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn event_types(events: &[SyncEvent]) -> Vec<&'static str> {
    events.iter().map(SyncEvent::event_type).collect()
}

// ============================================================================
// Search Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_search_lifecycle_events_share_a_correlation_id() {
    let h = harness(completed(&["2xyz", "3abc", "4def"]));
    let mut events = h.engine.events();

    let outcome = h
        .engine
        .search(SearchQuery::new("1tup"), SearchType::Structure)
        .await
        .expect("search");
    assert_eq!(outcome, SearchOutcome::Completed(3));
    h.engine.flush().await;

    let events = drain(&mut events);
    let types = event_types(&events);
    assert_eq!(types.first(), Some(&"search_started"));
    assert!(types.contains(&"progress_updated"));
    assert!(types.contains(&"search_completed"));
    assert!(types.contains(&"story_loaded"));

    let started = events[0].meta().correlation_id.clone();
    assert!(started.is_some());
    let completed = events
        .iter()
        .find(|event| event.event_type() == "search_completed")
        .unwrap();
    assert_eq!(completed.meta().correlation_id, started);
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_observable_while_polling() {
    let h = harness(ScriptedTransport::new([
        Ok(SearchResponse::queued(5)),
        Ok(SearchResponse::queued(2)),
        Ok(SearchResponse::completed(results(&["2xyz"]))),
    ]));
    let messages = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&messages);
    let _sub = h.engine.subscribe_field(
        |state| state.progress.as_ref().and_then(|p| p.queue_position),
        move |position| sink.lock().unwrap().push(*position),
    );

    h.engine
        .search(SearchQuery::new("1tup"), SearchType::Structure)
        .await
        .expect("search");

    let seen = messages.lock().unwrap().clone();
    assert_eq!(seen, vec![Some(5), Some(2), None]);
    assert!(h.engine.state().progress.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_search_surfaces_error() {
    let h = harness(ScriptedTransport::new([Ok(SearchResponse::queued(9))]));
    let mut events = h.engine.events();

    let err = h
        .engine
        .search(SearchQuery::new("1tup"), SearchType::Structure)
        .await
        .expect_err("exhausted");
    assert!(matches!(err, Error::SearchFailed { attempts: 4, .. }));

    let state = h.engine.state();
    assert!(!state.is_searching);
    assert!(state.validation_error.is_some());
    assert!(state.results.is_empty());
    assert!(event_types(&drain(&mut events)).contains(&"search_failed"));

    // The same query may be retried after an error
    assert!(h.engine.set_query(SearchQuery::new("1tup"), SearchType::Structure));
}

#[tokio::test(start_paused = true)]
async fn test_late_response_never_overwrites_newer_results() {
    // The first search is slow; the second overtakes it
    let slow = harness(completed(&["2xyz"]).with_latency(Duration::from_millis(500)));
    let engine = slow.engine.clone();

    let first = tokio::spawn({
        let engine = engine.clone();
        async move {
            engine
                .search(SearchQuery::new("1tup"), SearchType::Structure)
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A newer query bumps the token; its results are committed directly
    assert!(engine.set_query(SearchQuery::new("4hhb"), SearchType::Structure));
    engine.set_results(results(&["9new"])).expect("results");

    let outcome = first.await.expect("join").expect("search");
    assert_eq!(outcome, SearchOutcome::Stale);
    engine.flush().await;

    let state = engine.state();
    assert_eq!(state.query, Some(SearchQuery::new("4hhb")));
    assert_eq!(state.results.len(), 1);
    assert_eq!(state.results[0].object_id, "9new");
    assert_eq!(slow.viewer.loaded_keys(), vec!["scene_9new"]);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_search_uses_mapped_accession() {
    let h = harness(completed(&["AF-P04637-F1"]));
    h.engine
        .search(SearchQuery::new("1TUP"), SearchType::Sequence)
        .await
        .expect("search");
    assert_eq!(h.transport.requests()[0].query, "P04637");
    assert_eq!(h.engine.state().search_type, SearchType::Sequence);
}

// ============================================================================
// Story Loading and Selection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_selection_waits_for_snapshot_registration() {
    let h = harness_with(
        completed(&["2xyz", "3abc"]),
        InMemoryEngine::new().with_registration_delay(Duration::from_millis(250)),
        EngineConfig::default(),
    );
    h.engine.set_results(results(&["2xyz", "3abc"])).expect("results");

    let applied = h
        .engine
        .select_result(&results(&["2xyz", "3abc"])[1])
        .await
        .expect("select");
    assert!(applied);
    assert_eq!(h.viewer.current_key().as_deref(), Some("scene_3abc"));
}

#[tokio::test(start_paused = true)]
async fn test_registration_timeout_is_reported_not_fatal() {
    let h = harness_with(
        completed(&["2xyz"]),
        InMemoryEngine::new().with_registration_delay(Duration::from_secs(60)),
        EngineConfig {
            snapshot_wait_attempts: 3,
            snapshot_wait_delay: Duration::from_millis(10),
            ..EngineConfig::default()
        },
    );
    let mut events = h.engine.events();

    h.engine.set_results(results(&["2xyz"])).expect("results");
    h.engine.flush().await;

    let events = drain(&mut events);
    let failed = events.iter().find_map(|event| match event {
        SyncEvent::EngineOperationFailed { operation, error, .. } => {
            Some((operation.clone(), error.clone()))
        },
        _ => None,
    });
    let (operation, error) = failed.expect("failure event");
    assert_eq!(operation, "load_snapshot_sequence");
    assert!(error.contains("scene_2xyz"));

    // Application state keeps the committed results
    let state = h.engine.state();
    assert_eq!(state.results.len(), 1);
    assert_eq!(state.active_scene_key.as_deref(), Some("scene_2xyz"));
}

#[tokio::test(start_paused = true)]
async fn test_engine_calls_never_overlap() {
    let h = harness_with(
        completed(&["2xyz"]),
        InMemoryEngine::new().with_operation_latency(Duration::from_millis(20)),
        EngineConfig::default(),
    );
    let all = results(&["a1", "b2", "c3", "d4"]);
    h.engine.set_results(all.clone()).expect("results");

    let tasks: Vec<_> = all.iter().map(|r| h.engine.select_result(r)).collect();
    let clear = h.engine.clear();
    for task in tasks {
        task.await.expect("select");
    }
    clear.await.expect("clear");

    assert_eq!(h.viewer.max_concurrency(), 1);
    assert_eq!(h.viewer.clear_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_superseded_selections_are_skipped() {
    let h = harness(completed(&["2xyz"]));
    let all = results(&["a1", "b2", "c3"]);
    h.engine.set_results(all.clone()).expect("results");

    let first = h.engine.select_result(&all[1]);
    let last = h.engine.select_result(&all[2]);
    assert!(!first.await.expect("select"));
    assert!(last.await.expect("select"));
    assert_eq!(h.viewer.current_key().as_deref(), Some("scene_c3"));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_keys_follow_policy() {
    let reject = harness_with(
        completed(&["2xyz"]),
        InMemoryEngine::new(),
        EngineConfig {
            story: StoryOptions::default().with_duplicate_policy(DuplicatePolicy::Reject),
            ..EngineConfig::default()
        },
    );
    let err = reject
        .engine
        .set_results(results(&["2xyz", "2xyz"]))
        .expect_err("duplicate");
    assert!(matches!(err, Error::DuplicateSceneKey(_)));
    assert!(reject.engine.state().validation_error.is_some());
    assert!(reject.engine.state().story.is_none());

    let keep = harness_with(
        completed(&["2xyz"]),
        InMemoryEngine::new(),
        EngineConfig {
            story: StoryOptions::default().with_duplicate_policy(DuplicatePolicy::KeepFirst),
            ..EngineConfig::default()
        },
    );
    keep.engine
        .set_results(results(&["2xyz", "3abc", "2xyz"]))
        .expect("results");
    let story = keep.engine.state().story.clone().expect("story");
    assert_eq!(story.keys(), vec!["scene_2xyz", "scene_3abc"]);
}

// ============================================================================
// Viewer Feedback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_applies_do_not_echo_into_state_updates() {
    let h = harness(completed(&["2xyz", "3abc"]));
    let _forwarder = h.engine.attach_viewer();
    let updates = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&updates);
    let _sub = h.engine.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.engine
        .search(SearchQuery::new("1tup"), SearchType::Structure)
        .await
        .expect("search");
    h.engine.flush().await;
    let after_search = updates.load(Ordering::SeqCst);

    // The engine reports the apply it just performed; it must settle quietly
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(updates.load(Ordering::SeqCst), after_search);
    assert_eq!(h.viewer.applied_keys(), vec!["scene_2xyz"]);
}

#[tokio::test(start_paused = true)]
async fn test_user_navigation_in_viewer_updates_selection() {
    let h = harness(completed(&["2xyz", "3abc"]));
    let _forwarder = h.engine.attach_viewer();
    h.engine
        .search(SearchQuery::new("1tup"), SearchType::Structure)
        .await
        .expect("search");
    h.engine.flush().await;

    h.viewer.navigate_to("scene_3abc");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.engine.state().active_scene_key.as_deref(),
        Some("scene_2xyz"),
        "change applied before the debounce window passed"
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = h.engine.state();
    assert_eq!(state.active_scene_key.as_deref(), Some("scene_3abc"));
    assert_eq!(
        state.selected_result.as_ref().map(|r| r.object_id.as_str()),
        Some("3abc")
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_viewer_keys_are_ignored() {
    let h = harness(completed(&["2xyz"]));
    h.engine
        .search(SearchQuery::new("1tup"), SearchType::Structure)
        .await
        .expect("search");
    h.engine.flush().await;

    h.engine.current_scene_changed("scene_not_in_story");
    h.engine.current_scene_changed("authored_intro");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        h.engine.state().active_scene_key.as_deref(),
        Some("scene_2xyz")
    );
}

// ============================================================================
// Clearing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_viewer_changes_ignored_while_clear_pending() {
    let h = harness_with(
        completed(&["2xyz", "3abc"]),
        InMemoryEngine::new().with_operation_latency(Duration::from_millis(100)),
        EngineConfig::default(),
    );
    h.engine.set_results(results(&["2xyz", "3abc"])).expect("results");
    h.engine.flush().await;

    let clear = h.engine.clear();
    h.engine.current_scene_changed("scene_3abc");
    tokio::time::sleep(Duration::from_millis(150)).await;
    clear.await.expect("clear");

    let state = h.engine.state();
    assert!(state.active_scene_key.is_none());
    assert!(state.story.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_clear_ack_does_not_wipe_newer_search() {
    let h = harness_with(
        completed(&["2xyz"]),
        InMemoryEngine::new().with_operation_latency(Duration::from_millis(100)),
        EngineConfig::default(),
    );
    h.engine.set_results(results(&["2xyz"])).expect("results");
    let mut events = h.engine.events();

    let clear = h.engine.clear();
    assert!(h.engine.set_query(SearchQuery::new("4hhb"), SearchType::Structure));
    clear.await.expect("clear");

    let state = h.engine.state();
    assert!(!state.pending_clear);
    assert_eq!(state.query, Some(SearchQuery::new("4hhb")));
    assert!(state.is_searching);
    assert!(event_types(&drain(&mut events)).contains(&"cleared"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_clear_keeps_state() {
    let h = harness(completed(&["2xyz"]));
    h.engine.set_results(results(&["2xyz"])).expect("results");
    h.engine.flush().await;

    h.viewer.fail_next("clear");
    let err = h.engine.clear().await.expect_err("clear fails");
    assert!(matches!(err, Error::EngineOperationFailed { .. }));

    let state = h.engine.state();
    assert!(!state.pending_clear);
    assert!(state.story.is_some());
    assert_eq!(state.results.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_subscription_stops_notifications() {
    let h = harness(completed(&["2xyz"]));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let sub = h.engine.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    h.engine.set_validation_error(Some("first".into()));
    drop(sub);
    h.engine.set_validation_error(Some("second".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Transition Atomicity
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_identical_idle_query_keeps_the_same_snapshot() {
    let h = harness(completed(&["2xyz"]));
    assert!(h.engine.set_query(SearchQuery::new("1tup"), SearchType::Structure));
    h.engine.set_results(results(&["2xyz"])).expect("results");
    h.engine.flush().await;

    let before = h.engine.state();
    assert!(!before.is_searching);
    assert!(!h.engine.set_query(SearchQuery::new("1tup"), SearchType::Structure));
    assert!(Arc::ptr_eq(&before, &h.engine.state()));

    // A different search type is a different query
    assert!(h.engine.set_query(SearchQuery::new("1tup"), SearchType::Sequence));
    assert!(!Arc::ptr_eq(&before, &h.engine.state()));
}

#[tokio::test(start_paused = true)]
async fn test_validation_error_clears_dependents_in_one_notification() {
    let h = harness(completed(&["2xyz"]));
    assert!(h.engine.set_query(SearchQuery::new("1tup"), SearchType::Structure));
    let token = h.engine.state().request_token;
    let committed = results(&["2xyz", "3abc"]);
    h.engine.set_results(committed.clone()).expect("results");
    assert!(h.engine.set_progress(token, ProgressInfo::new(ProgressStage::Completed, 2, 4)));
    assert!(h.engine.select_result(&committed[1]).await.expect("select"));
    h.engine.flush().await;

    let populated = h.engine.state();
    assert_eq!(populated.results.len(), 2);
    assert!(populated.progress.is_some());
    assert!(populated.selected_result.is_some());

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let _sub = h.engine.subscribe(move |state| {
        recorded.lock().unwrap().push((
            state.results.len(),
            state.progress.is_none(),
            state.selected_result.is_none(),
        ));
    });

    h.engine.set_validation_error(Some("bad id".into()));

    assert_eq!(*seen.lock().unwrap(), vec![(0, true, true)]);
    let state = h.engine.state();
    assert_eq!(state.validation_error.as_deref(), Some("bad id"));
    assert!(!state.is_searching);
}
