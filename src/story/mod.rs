//! Story generation: turns ranked search results into keyed scenes.
//!
//! Building is a pure transform. Each result becomes one scene keyed
//! `scene_<objectId>` that carries a markdown description and a structured
//! [`Procedure`](crate::models::Procedure) for the visualization engine.

mod builder;
mod description;
mod procedure;

pub use builder::{
    DEFAULT_LINGER_MS, DEFAULT_TRANSITION_MS, DuplicatePolicy, StoryBuilder, StoryOptions,
    build_story, scene_id, scene_key,
};
pub use description::alignment_description;
pub use procedure::{
    ProcedureBuilder, QUERY_COLOR, StructureSource, TARGET_COLOR, alignment_procedure,
};
