//! In-memory reference implementation of [`StorageBackend`]. Keeps every
//! entity in an ordinary `HashMap` guarded by a single mutex; correctness,
//! not throughput, is the point — this is what every test in the crate
//! runs against.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{StorageBackend, VectorSearchResult};
use crate::embeddings::cosine_similarity;
use crate::error::{Error, Result};
use crate::types::{EmbeddingRecord, Episode, EpisodeStatus, Fact, Metadata, SessionStats, Turn};

#[derive(Default)]
struct State {
    turns: HashMap<Uuid, Turn>,
    episodes: HashMap<Uuid, Episode>,
    facts: HashMap<Uuid, Fact>,
    embeddings: HashMap<Uuid, EmbeddingRecord>,
}

/// An in-process storage backend with no persistence across restarts.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    /// Construct an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn metadata_matches(metadata: &Metadata, filter: &Metadata) -> bool {
    filter
        .iter()
        .all(|(k, v)| metadata.get(k).is_some_and(|actual| actual == v))
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn save_turn(&self, turn: &Turn) -> Result<()> {
        self.state.lock().turns.insert(turn.id, turn.clone());
        Ok(())
    }

    async fn get_turn(&self, id: Uuid) -> Result<Option<Turn>> {
        Ok(self.state.lock().turns.get(&id).cloned())
    }

    async fn get_turns_by_episode(&self, episode_id: Uuid) -> Result<Vec<Turn>> {
        let mut turns: Vec<Turn> = self
            .state
            .lock()
            .turns
            .values()
            .filter(|t| t.episode_id == episode_id)
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.position);
        Ok(turns)
    }

    async fn get_turns_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>> {
        let mut turns: Vec<Turn> = self
            .state
            .lock()
            .turns
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.created_at);
        turns.truncate(limit);
        Ok(turns)
    }

    async fn get_marked_turns(
        &self,
        session_id: &str,
        exclude_episode: Option<Uuid>,
    ) -> Result<Vec<Turn>> {
        let mut turns: Vec<Turn> = self
            .state
            .lock()
            .turns
            .values()
            .filter(|t| {
                t.session_id == session_id
                    && !t.markers.is_empty()
                    && exclude_episode != Some(t.episode_id)
            })
            .cloned()
            .collect();
        turns.sort_by_key(|t| t.created_at);
        Ok(turns)
    }

    async fn save_episode(&self, episode: &Episode) -> Result<()> {
        self.state
            .lock()
            .episodes
            .insert(episode.id, episode.clone());
        Ok(())
    }

    async fn get_episode(&self, id: Uuid) -> Result<Option<Episode>> {
        Ok(self.state.lock().episodes.get(&id).cloned())
    }

    async fn get_episodes(
        &self,
        session_id: &str,
        limit: usize,
        status: Option<EpisodeStatus>,
    ) -> Result<Vec<Episode>> {
        let mut episodes: Vec<Episode> = self
            .state
            .lock()
            .episodes
            .values()
            .filter(|e| {
                e.session_id == session_id && status.is_none_or(|s| e.status == s)
            })
            .cloned()
            .collect();
        episodes.sort_by_key(|e| e.created_at);
        episodes.truncate(limit);
        Ok(episodes)
    }

    async fn update_episode(&self, episode: &Episode) -> Result<()> {
        let mut state = self.state.lock();
        if !state.episodes.contains_key(&episode.id) {
            return Err(Error::storage(
                "update_episode",
                anyhow::anyhow!("episode {} not found", episode.id),
            ));
        }
        state.episodes.insert(episode.id, episode.clone());
        Ok(())
    }

    async fn save_embedding(&self, id: Uuid, vector: Vec<f32>, metadata: Metadata) -> Result<()> {
        self.state
            .lock()
            .embeddings
            .insert(id, EmbeddingRecord { id, vector, metadata });
        Ok(())
    }

    async fn get_embedding(&self, id: Uuid) -> Result<Option<EmbeddingRecord>> {
        Ok(self.state.lock().embeddings.get(&id).cloned())
    }

    async fn vector_search(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&Metadata>,
    ) -> Result<Vec<VectorSearchResult>> {
        let state = self.state.lock();
        let mut scored: Vec<VectorSearchResult> = state
            .embeddings
            .values()
            .filter(|e| filter.is_none_or(|f| metadata_matches(&e.metadata, f)))
            .map(|e| VectorSearchResult {
                id: e.id,
                score: cosine_similarity(vector, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    async fn save_fact(&self, fact: &Fact) -> Result<()> {
        self.state.lock().facts.insert(fact.id, fact.clone());
        Ok(())
    }

    async fn get_facts_by_session(&self, session_id: &str) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self
            .state
            .lock()
            .facts
            .values()
            .filter(|f| f.session_id == session_id)
            .cloned()
            .collect();
        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }

    async fn get_facts_by_episode(&self, episode_id: Uuid) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self
            .state
            .lock()
            .facts
            .values()
            .filter(|f| f.episode_id == episode_id)
            .cloned()
            .collect();
        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }

    async fn get_active_facts_by_session(&self, session_id: &str) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self
            .state
            .lock()
            .facts
            .values()
            .filter(|f| f.session_id == session_id && f.is_active())
            .cloned()
            .collect();
        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }

    async fn update_fact(&self, fact: &Fact) -> Result<()> {
        let mut state = self.state.lock();
        if !state.facts.contains_key(&fact.id) {
            return Err(Error::storage(
                "update_fact",
                anyhow::anyhow!("fact {} not found", fact.id),
            ));
        }
        state.facts.insert(fact.id, fact.clone());
        Ok(())
    }

    async fn get_session_stats(&self, session_id: &str) -> Result<SessionStats> {
        let state = self.state.lock();

        let turns: Vec<&Turn> = state
            .turns
            .values()
            .filter(|t| t.session_id == session_id)
            .collect();
        let episodes: Vec<&Episode> = state
            .episodes
            .values()
            .filter(|e| e.session_id == session_id)
            .collect();
        let facts_count = state
            .facts
            .values()
            .filter(|f| f.session_id == session_id)
            .count();

        let open_episode = episodes.iter().find(|e| e.status == EpisodeStatus::Open);
        let total_tokens_ingested: u64 = turns.iter().map(|t| t.token_count as u64).sum();

        let created_at = turns
            .iter()
            .map(|t| t.created_at)
            .chain(episodes.iter().map(|e| e.created_at))
            .min()
            .unwrap_or_else(Utc::now);
        let last_activity_at = turns
            .iter()
            .map(|t| t.created_at)
            .chain(episodes.iter().map(|e| e.created_at))
            .max()
            .unwrap_or(created_at);

        Ok(SessionStats {
            session_id: session_id.to_string(),
            total_turns: turns.len() as u64,
            total_episodes: episodes.len() as u64,
            total_facts: facts_count as u64,
            open_episode_id: open_episode.map(|e| e.id),
            open_episode_turn_count: open_episode.map_or(0, |e| e.turn_count),
            total_tokens_ingested,
            created_at,
            last_activity_at,
        })
    }
}
