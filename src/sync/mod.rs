//! State synchronization between searches, the selection and the engine.
//!
//! [`SyncEngine`] is the single writer of [`SyncState`]. State lives in a
//! copy-on-write [`Store`]: every transition swaps in a new snapshot, and
//! request tokens let late search responses and clear acknowledgments be
//! recognized as stale.

mod debounce;
mod engine;
mod state;
mod store;

pub use debounce::Debouncer;
pub use engine::{EngineConfig, EngineTask, SearchOutcome, SyncEngine};
pub use state::SyncState;
pub use store::{Store, Subscription};
