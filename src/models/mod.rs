//! Data models for foldscene.
//!
//! This module contains the core data structures shared by the search client,
//! the story builder and the sync engine.

mod events;
mod procedure;
mod search;
mod story;

pub use events::{EventMeta, SyncEvent};
pub use procedure::{
    ComponentKind, Procedure, ProcedureStep, RepresentationKind, StructureFormat, Transform,
};
pub use search::{
    DEFAULT_RESULT_LIMIT, IdentifierKind, ProgressInfo, ProgressStage, SearchOptions, SearchQuery,
    SearchResult, SearchType,
};
pub use story::{SCENE_KEY_PREFIX, Scene, SceneId, Story, StoryMetadata};
