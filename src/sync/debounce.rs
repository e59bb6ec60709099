//! Trailing-edge debouncing.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

struct DebounceState<T> {
    generation: u64,
    pending: Option<T>,
}

/// Collapses bursts of values into the last one.
///
/// Each [`push`](Self::push) restarts the window; the sink receives a value
/// only after `window` passes with no newer push.
pub struct Debouncer<T> {
    window: Duration,
    state: Arc<Mutex<DebounceState<T>>>,
    sink: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Creates a debouncer delivering settled values to `sink`.
    pub fn new<F>(window: Duration, sink: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            window,
            state: Arc::new(Mutex::new(DebounceState {
                generation: 0,
                pending: None,
            })),
            sink: Arc::new(sink),
        }
    }

    /// Records a value and restarts the window.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, value: T) {
        let generation = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.generation = state.generation.wrapping_add(1);
            state.pending = Some(value);
            state.generation
        };

        let state = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let settled = {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.generation == generation {
                    state.pending.take()
                } else {
                    None
                }
            };
            if let Some(value) = settled {
                sink(value);
            }
        });
    }

    /// Drops any pending value.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.generation = state.generation.wrapping_add(1);
        state.pending = None;
    }

    /// Returns true if a value is waiting for its window to pass.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .is_some()
    }
}
