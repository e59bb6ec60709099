//! Copy-on-write observable store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Listener<S> = Arc<dyn Fn(&Arc<S>) + Send + Sync>;

struct StoreInner<S> {
    state: Mutex<Arc<S>>,
    listeners: Mutex<Vec<(u64, Listener<S>)>>,
    next_id: AtomicU64,
}

/// Holds an immutable snapshot and notifies listeners on every replacement.
///
/// Updates compute a new snapshot from the previous one under a lock and
/// swap it in whole. Listeners run after the lock is released, so they may
/// read the store or issue further updates.
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Send + Sync + 'static> Store<S> {
    /// Creates a store holding `initial`.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(Arc::new(initial)),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get(&self) -> Arc<S> {
        Arc::clone(
            &self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Atomically replaces the snapshot with `transition(previous)`.
    ///
    /// A `None` from the transition leaves the snapshot (and its `Arc`)
    /// untouched and notifies nobody. Returns the new snapshot, if any.
    pub fn update<F>(&self, transition: F) -> Option<Arc<S>>
    where
        F: FnOnce(&S) -> Option<S>,
    {
        let next = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let next = Arc::new(transition(&state)?);
            *state = Arc::clone(&next);
            next
        };
        self.notify(&next);
        Some(next)
    }

    fn notify(&self, state: &Arc<S>) {
        let listeners: Vec<Listener<S>> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(state);
        }
    }

    /// Registers a listener called with every new snapshot.
    ///
    /// The listener stays registered until the returned guard is dropped.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<L>(&self, listener: L) -> Subscription
    where
        L: Fn(&Arc<S>) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));

        let weak: Weak<StoreInner<S>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .listeners
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .retain(|(existing, _)| *existing != id);
                }
            })),
        }
    }

    /// Registers a listener for one projected field.
    ///
    /// The listener fires only when the projection's value changes.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe_field<T, P, L>(&self, projection: P, listener: L) -> Subscription
    where
        T: PartialEq + Send + 'static,
        P: Fn(&S) -> T + Send + Sync + 'static,
        L: Fn(&T) + Send + Sync + 'static,
    {
        let last = Mutex::new(projection(&self.get()));
        self.subscribe(move |state| {
            let value = projection(state);
            let mut last = last.lock().unwrap_or_else(PoisonError::into_inner);
            if *last != value {
                listener(&value);
                *last = value;
            }
        })
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Scoped listener registration; unsubscribes on drop.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
