//! The entities that make up the three memory levels (L0 turns, L1
//! episodes, L2 facts) plus the supporting records recall and storage pass
//! around: embeddings and the assembled `ContextItem`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::enums::{ContextSource, EpisodeStatus, Role};

/// Arbitrary, caller-supplied metadata attached to a turn, episode, or fact.
pub type Metadata = HashMap<String, Value>;

/// A verbatim L0 record of one role's contribution to a session.
///
/// Immutable once saved, except that `embedding_id` is populated exactly
/// once, at ingestion time, before the turn is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique id of this turn.
    pub id: Uuid,
    /// Session this turn belongs to.
    pub session_id: String,
    /// Episode this turn was assigned to.
    pub episode_id: Uuid,
    /// Who produced the turn.
    pub role: Role,
    /// Trimmed, non-empty content.
    pub content: String,
    /// When the turn was ingested.
    pub created_at: DateTime<Utc>,
    /// Optional identifier for the specific actor (e.g. a tool name).
    pub actor_id: Option<String>,
    /// Markers attached to this turn, deduplicated, order-preserving.
    pub markers: Vec<String>,
    /// Token count under the configured counter.
    pub token_count: usize,
    /// Id of the saved embedding for this turn's content, if any.
    pub embedding_id: Option<Uuid>,
    /// Monotonically increasing position within the session.
    pub position: u64,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
}

/// A bounded, contiguous grouping of turns — the unit of reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    /// Unique id of this episode.
    pub id: Uuid,
    /// Session this episode belongs to.
    pub session_id: String,
    /// Whether the episode is still accepting turns.
    pub status: EpisodeStatus,
    /// When the episode was opened.
    pub created_at: DateTime<Utc>,
    /// When the episode was closed, if it has been.
    pub closed_at: Option<DateTime<Utc>>,
    /// Why the episode was closed, if it has been.
    pub close_reason: Option<String>,
    /// Number of turns assigned to this episode.
    pub turn_count: u32,
    /// Sum of `token_count` over assigned turns.
    pub total_tokens: u64,
    /// Union of markers across all assigned turns.
    pub markers: Vec<String>,
    /// Optional human- or LLM-authored summary (not populated by the core).
    pub summary: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
}

impl Episode {
    /// Start a new, open episode for `session_id`.
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            status: EpisodeStatus::Open,
            created_at: Utc::now(),
            closed_at: None,
            close_reason: None,
            turn_count: 0,
            total_tokens: 0,
            markers: Vec::new(),
            summary: None,
            metadata: Metadata::new(),
        }
    }

    /// Fold a newly assigned turn's markers and token count into the
    /// episode's running totals.
    pub fn record_turn(&mut self, turn: &Turn) {
        self.turn_count += 1;
        self.total_tokens += turn.token_count as u64;
        for marker in &turn.markers {
            if !self.markers.contains(marker) {
                self.markers.push(marker.clone());
            }
        }
    }

    /// Close the episode, recording why and when.
    pub fn close(&mut self, reason: impl Into<String>) {
        self.status = EpisodeStatus::Closed;
        self.closed_at = Some(Utc::now());
        self.close_reason = Some(reason.into());
    }
}

/// The sentinel written to `Fact::superseded_by` when a REMOVE action
/// retires a fact without replacing it.
#[must_use]
pub fn removed_by_sentinel(episode_id: Uuid) -> String {
    format!("removed_by_{episode_id}")
}

/// An LLM-distilled L2 statement, evolving across episodes via
/// supersession.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Unique id of this fact.
    pub id: Uuid,
    /// Session this fact belongs to.
    pub session_id: String,
    /// Episode whose reflection produced this fact.
    pub episode_id: Uuid,
    /// The distilled statement.
    pub content: String,
    /// When the fact was created.
    pub created_at: DateTime<Utc>,
    /// Category, reusing `MarkerType`'s vocabulary; defaults to `decision`.
    pub fact_type: super::enums::MarkerType,
    /// Confidence in [0, 1] as reported by the reflector.
    pub confidence: f32,
    /// Id of the saved embedding for this fact's content, if any.
    pub embedding_id: Option<Uuid>,
    /// Token count under the configured counter.
    pub token_count: usize,
    /// Either a fact id, or the sentinel from [`removed_by_sentinel`].
    /// Unset iff the fact is active.
    pub superseded_by: Option<String>,
    /// Ids of facts this one replaces (set when created by an UPDATE
    /// action).
    pub supersedes: Vec<Uuid>,
    /// Caller-supplied metadata.
    pub metadata: Metadata,
}

impl Fact {
    /// Whether this fact is active, i.e. not yet superseded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}

/// A saved embedding vector plus the metadata recall and storage use to
/// filter vector search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Unique id of this embedding.
    pub id: Uuid,
    /// The dense vector, of fixed dimension for the embedder instance.
    pub vector: Vec<f32>,
    /// Filterable metadata, conventionally including `session_id`,
    /// `type` (`"turn"` or `"fact"`), and a back-reference id.
    pub metadata: Metadata,
}

/// One item of assembled context returned by `recall`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// Id of the underlying turn or fact.
    pub id: Uuid,
    /// The content to inject into the prompt.
    pub content: String,
    /// Role of the underlying turn, if this item is a turn.
    pub role: Option<Role>,
    /// Where this item came from.
    pub source: ContextSource,
    /// `relevance + marker_boost`, the value items are ranked by.
    pub score: f32,
    /// Token count under the configured counter.
    pub token_count: usize,
    /// Markers carried by the underlying turn or fact.
    pub markers: Vec<String>,
    /// Creation time of the underlying turn or fact.
    pub timestamp: DateTime<Utc>,
}

/// Aggregate counters for a session, as returned by
/// `StorageBackend::get_session_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// The session these stats describe.
    pub session_id: String,
    /// Total turns ever ingested.
    pub total_turns: u64,
    /// Total episodes ever opened.
    pub total_episodes: u64,
    /// Total facts ever saved (active or superseded).
    pub total_facts: u64,
    /// Id of the currently open episode, if any.
    pub open_episode_id: Option<Uuid>,
    /// Turn count of the currently open episode.
    pub open_episode_turn_count: u32,
    /// Sum of `token_count` over every ingested turn.
    pub total_tokens_ingested: u64,
    /// When the session was first used.
    pub created_at: DateTime<Utc>,
    /// When the session was last used.
    pub last_activity_at: DateTime<Utc>,
}
