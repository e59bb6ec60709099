//! Search: backoff polling, the search client and identifier resolution.

mod backoff;
mod client;
mod identifier;
mod transport;

pub use backoff::{BackoffConfig, BackoffPoller, PollTick, Probe};
pub use client::{
    DEFAULT_SEARCH_TIMEOUT, NoopObserver, PollOutcome, SearchClient, SearchObserver,
};
pub use identifier::{Identifier, IdentifierResolver, PatternIdentifierResolver, classify_identifier};
pub use transport::{
    HttpSearchTransport, ScriptedTransport, SearchRequest, SearchResponse, SearchTransport,
};
