//! Headless in-memory visualization engine.

use super::{Snapshot, VisualizationEngine};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct EngineState {
    snapshots: Vec<Snapshot>,
    loaded_at: Option<Instant>,
    current: Option<String>,
    applied: Vec<String>,
    clears: usize,
    loads: usize,
    failing: HashSet<&'static str>,
}

/// Visualization engine that keeps snapshots in memory.
///
/// Used by the CLI and by tests. Like a real renderer, loaded snapshots
/// only become visible to [`find_snapshot`](VisualizationEngine::find_snapshot)
/// after a registration delay, and applying a snapshot emits a
/// current-changed event.
pub struct InMemoryEngine {
    state: Mutex<EngineState>,
    changes: broadcast::Sender<String>,
    registration_delay: Duration,
    operation_latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryEngine {
    /// Creates an engine that registers snapshots immediately.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(EngineState::default()),
            changes,
            registration_delay: Duration::ZERO,
            operation_latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delays snapshot registration after each load.
    #[must_use]
    pub const fn with_registration_delay(mut self, delay: Duration) -> Self {
        self.registration_delay = delay;
        self
    }

    /// Makes every mutating call take this long.
    #[must_use]
    pub const fn with_operation_latency(mut self, latency: Duration) -> Self {
        self.operation_latency = latency;
        self
    }

    /// Makes the next call of `operation` fail.
    ///
    /// `operation` is one of `clear`, `load_snapshot_sequence` or
    /// `apply_snapshot_by_key`.
    pub fn fail_next(&self, operation: &'static str) {
        self.lock().failing.insert(operation);
    }

    /// Simulates the user navigating to a snapshot inside the viewer.
    ///
    /// Emits a current-changed event without any apply call.
    pub fn navigate_to(&self, key: &str) {
        self.lock().current = Some(key.to_string());
        let _ = self.changes.send(key.to_string());
    }

    /// Returns the current snapshot key.
    #[must_use]
    pub fn current_key(&self) -> Option<String> {
        self.lock().current.clone()
    }

    /// Returns the keys passed to `apply_snapshot_by_key`, in order.
    #[must_use]
    pub fn applied_keys(&self) -> Vec<String> {
        self.lock().applied.clone()
    }

    /// Returns the keys of the loaded sequence.
    #[must_use]
    pub fn loaded_keys(&self) -> Vec<String> {
        self.lock()
            .snapshots
            .iter()
            .map(|snapshot| snapshot.key.clone())
            .collect()
    }

    /// Returns how many times `clear` succeeded.
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.lock().clears
    }

    /// Returns how many times a sequence was loaded.
    #[must_use]
    pub fn load_count(&self) -> usize {
        self.lock().loads
    }

    /// Returns the highest number of mutating calls observed at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks concurrency, applies latency and checks failure injection.
    async fn enter(&self, operation: &'static str) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.operation_latency.is_zero() {
            tokio::time::sleep(self.operation_latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.lock().failing.remove(operation) {
            return Err(Error::EngineOperationFailed {
                operation: operation.to_string(),
                cause: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn is_registered(&self, state: &EngineState) -> bool {
        state
            .loaded_at
            .is_some_and(|at| at.elapsed() >= self.registration_delay)
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VisualizationEngine for InMemoryEngine {
    async fn clear(&self) -> Result<()> {
        self.enter("clear").await?;
        let mut state = self.lock();
        state.snapshots.clear();
        state.loaded_at = None;
        state.current = None;
        state.clears += 1;
        Ok(())
    }

    async fn load_snapshot_sequence(&self, snapshots: &[Snapshot]) -> Result<()> {
        self.enter("load_snapshot_sequence").await?;
        let mut state = self.lock();
        state.snapshots = snapshots.to_vec();
        state.loaded_at = Some(Instant::now());
        state.current = None;
        state.loads += 1;
        Ok(())
    }

    async fn apply_snapshot_by_key(&self, key: &str) -> Result<()> {
        self.enter("apply_snapshot_by_key").await?;
        {
            let mut state = self.lock();
            let known = self.is_registered(&state)
                && state.snapshots.iter().any(|snapshot| snapshot.key == key);
            if !known {
                return Err(Error::EngineOperationFailed {
                    operation: "apply_snapshot_by_key".to_string(),
                    cause: format!("no registered snapshot '{key}'"),
                });
            }
            state.current = Some(key.to_string());
            state.applied.push(key.to_string());
        }
        let _ = self.changes.send(key.to_string());
        Ok(())
    }

    async fn find_snapshot(&self, key: &str) -> Option<Snapshot> {
        let state = self.lock();
        if !self.is_registered(&state) {
            return None;
        }
        state
            .snapshots
            .iter()
            .find(|snapshot| snapshot.key == key)
            .cloned()
    }

    fn subscribe_current_changes(&self) -> broadcast::Receiver<String> {
        self.changes.subscribe()
    }
}
