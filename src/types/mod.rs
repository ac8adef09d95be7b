//! Data model: entities, enums, and the metadata map they share.

mod enums;
mod structs;

pub use enums::{ContextSource, ConsolidationActionType, EpisodeStatus, MarkerType, Role};
pub use structs::{
    ContextItem, EmbeddingRecord, Episode, Fact, Metadata, SessionStats, Turn,
    removed_by_sentinel,
};
