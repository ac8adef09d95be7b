//! The storage protocol the core consumes, plus an in-memory reference
//! implementation used by every test in this crate.

mod memory;

pub use memory::InMemoryStorage;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{EmbeddingRecord, Episode, EpisodeStatus, Fact, Metadata, SessionStats, Turn};

/// One hit from `vector_search`: the embedding id, its cosine similarity
/// to the query vector, and its stored metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchResult {
    /// Id of the matched embedding.
    pub id: Uuid,
    /// Cosine similarity to the query vector.
    pub score: f32,
    /// The embedding's stored metadata.
    pub metadata: Metadata,
}

/// CRUD plus vector search over turns, episodes, facts, and embeddings.
///
/// Every method may fail with [`crate::error::Error::Storage`], naming the
/// operation that failed. Implementations must preserve the ordering
/// guarantees documented on each method: the core relies on them rather
/// than re-sorting results itself.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Prepare the backend for use. Must be idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Release any resources held by the backend. Must be idempotent.
    async fn close(&self) -> Result<()>;

    /// Persist a new turn. Turns are immutable once saved.
    async fn save_turn(&self, turn: &Turn) -> Result<()>;

    /// Fetch a turn by id.
    async fn get_turn(&self, id: Uuid) -> Result<Option<Turn>>;

    /// All turns assigned to `episode_id`, ordered by `position` ascending.
    async fn get_turns_by_episode(&self, episode_id: Uuid) -> Result<Vec<Turn>>;

    /// The most recent `limit` turns in `session_id`, ordered by
    /// `created_at` ascending.
    async fn get_turns_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>>;

    /// All turns in `session_id` carrying at least one marker, optionally
    /// excluding one episode, ordered by `created_at` ascending.
    async fn get_marked_turns(
        &self,
        session_id: &str,
        exclude_episode: Option<Uuid>,
    ) -> Result<Vec<Turn>>;

    /// Persist a new episode.
    async fn save_episode(&self, episode: &Episode) -> Result<()>;

    /// Fetch an episode by id.
    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>>;

    /// Episodes in `session_id`, optionally filtered by status, ordered by
    /// `created_at` ascending, capped at `limit`.
    async fn get_episodes(
        &self,
        session_id: &str,
        limit: usize,
        status: Option<EpisodeStatus>,
    ) -> Result<Vec<Episode>>;

    /// Overwrite a previously saved episode (used for counter increments
    /// and for closing).
    async fn update_episode(&self, episode: &Episode) -> Result<()>;

    /// Persist a new embedding. Embeddings are write-once.
    async fn save_embedding(&self, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> Result<()>;

    /// Fetch an embedding by id.
    async fn get_embedding(&self, id: Uuid) -> Result<Option<EmbeddingRecord>>;

    /// Up to `k` embeddings most similar to `vector` by cosine similarity,
    /// descending, optionally filtered by an equality conjunction on
    /// metadata.
    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorSearchResult>>;

    /// Persist a new fact.
    async fn save_fact(&self, fact: &Fact) -> Result<()>;

    /// All facts ever saved for `session_id` (active or superseded).
    async fn get_facts_by_session(&self, session_id: &str) -> Result<Vec<Fact>>;

    /// All facts originating from `episode_id`.
    async fn get_facts_by_episode(&self, episode_id: Uuid) -> Result<Vec<Fact>>;

    /// Facts in `session_id` whose `superseded_by` is unset, ordered by
    /// `created_at` ascending.
    async fn get_active_facts_by_session(&self, session_id: &str) -> Result<Vec<Fact>>;

    /// Overwrite a previously saved fact. Used exclusively to set
    /// `superseded_by`.
    async fn update_fact(&self, fact: &Fact) -> Result<()>;

    /// Aggregate counters for `session_id`.
    async fn get_session_stats(&self, session_id: &str) -> Result<SessionStats>;
}
