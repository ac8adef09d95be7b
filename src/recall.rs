//! Assembles a token-budgeted, relevance-ordered slice of prior context
//! for a recall query: current-episode turns, marked turns, semantic
//! facts, and vector-retrieved turns, merged under a single scoring rule.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::embeddings::{cosine_similarity, is_zero_vector, Embedder};
use crate::episode_manager::EpisodeManager;
use crate::error::Result;
use crate::markers::marker_boost;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::storage::StorageBackend;
use crate::tokens::TokenCounter;
use crate::types::{ContextItem, ContextSource, Fact, Metadata, Turn};
use crate::validation::{validate_content, validate_relevance_threshold, validate_token_budget};

/// Default relevance assigned to a marked turn or fact with no usable
/// embedding signal.
const FALLBACK_RELEVANCE: f32 = 0.5;

/// Assembles recall results for one session.
pub struct RecallPipeline {
    session_id: String,
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn Embedder>,
    token_counter: Arc<dyn TokenCounter>,
    episode_manager: Arc<EpisodeManager>,
    config: MemoryConfig,
    retry_policy: RetryPolicy,
}

struct Scored<T> {
    item: T,
    relevance: f32,
    marker_boost: f32,
}

impl<T> Scored<T> {
    fn final_score(&self) -> f32 {
        self.relevance + self.marker_boost
    }
}

impl RecallPipeline {
    /// Construct a recall pipeline for `session_id`.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn Embedder>,
        token_counter: Arc<dyn TokenCounter>,
        episode_manager: Arc<EpisodeManager>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            storage,
            embedder,
            token_counter,
            episode_manager,
            config,
            retry_policy: RetryPolicy::with_config(RetryConfig::default()),
        }
    }

    /// Run a recall query, returning items within `token_budget` (or the
    /// configured default) in the order described in the module docs.
    #[instrument(skip(self, query), fields(session_id = %self.session_id))]
    pub async fn recall(
        &self,
        query: &str,
        token_budget: Option<usize>,
        include_current_episode: bool,
        min_relevance: Option<f32>,
    ) -> Result<Vec<ContextItem>> {
        let query = validate_content(query, self.config.max_content_length)?;
        let budget = validate_token_budget(token_budget.unwrap_or(self.config.recall.default_token_budget))?;
        let min_relevance = validate_relevance_threshold(
            min_relevance.unwrap_or(self.config.recall.min_relevance_threshold),
        )?;

        let query_vectors = self
            .retry_policy
            .execute(|| self.embedder.embed(std::slice::from_ref(&query)))
            .await?;
        let query_vector = query_vectors.into_iter().next().unwrap_or_default();
        let query_has_signal = !is_zero_vector(&query_vector);

        let current_episode_turns = if include_current_episode {
            self.episode_manager.get_current_episode_turns().await?
        } else {
            Vec::new()
        };
        let current_episode_ids: HashSet<Uuid> =
            current_episode_turns.iter().map(|t| t.id).collect();

        let marked_turns = self
            .storage
            .get_marked_turns(&self.session_id, self.episode_manager.current_episode_id())
            .await?;
        let marked_ids: HashSet<Uuid> = marked_turns.iter().map(|t| t.id).collect();

        let facts = self.storage.get_active_facts_by_session(&self.session_id).await?;

        let vector_turns = if query_has_signal {
            let mut filter = Metadata::new();
            filter.insert("session_id".into(), self.session_id.clone().into());
            filter.insert("type".into(), "turn".into());
            let results = self
                .storage
                .vector_search(&query_vector, self.config.recall.max_vector_results, Some(&filter))
                .await?;

            let mut turns = Vec::new();
            for result in results {
                if result.score < min_relevance {
                    continue;
                }
                let Some(turn_id) = result
                    .metadata
                    .get("turn_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok())
                else {
                    continue;
                };
                if current_episode_ids.contains(&turn_id) || marked_ids.contains(&turn_id) {
                    continue;
                }
                if let Some(turn) = self.storage.get_turn(turn_id).await? {
                    turns.push(Scored {
                        item: turn,
                        relevance: result.score,
                        marker_boost: 0.0,
                    });
                }
            }
            turns
        } else {
            Vec::new()
        };

        let mut scored_marked = Vec::with_capacity(marked_turns.len());
        for turn in marked_turns {
            let relevance = self.relevance_for(turn.embedding_id, &query_vector, query_has_signal).await?;
            let boost = marker_boost(&turn.markers, &self.config);
            scored_marked.push(Scored { item: turn, relevance, marker_boost: boost });
        }

        let mut scored_facts = Vec::with_capacity(facts.len());
        for fact in facts {
            let relevance = self.relevance_for(fact.embedding_id, &query_vector, query_has_signal).await?;
            let boost = self.config.marker_weight(&fact.fact_type.to_string());
            scored_facts.push(Scored { item: fact, relevance, marker_boost: boost });
        }

        let reservation = ((budget as f64) * f64::from(self.config.recall.current_episode_budget_pct)) as usize;
        let (selected_current, current_used) =
            select_current_episode_turns(&current_episode_turns, reservation, self.token_counter.as_ref());

        let mut remaining = budget.saturating_sub(current_used);

        scored_marked.sort_by(|a, b| b.final_score().partial_cmp(&a.final_score()).unwrap_or(std::cmp::Ordering::Equal));
        let mut admitted_marked = Vec::new();
        for scored in scored_marked {
            if scored.item.token_count > remaining {
                continue;
            }
            remaining -= scored.item.token_count;
            admitted_marked.push(scored);
        }

        let mut merged_rest: Vec<ContextItem> = Vec::new();
        let mut fact_items: Vec<Scored<Fact>> = scored_facts;
        fact_items.sort_by(|a, b| b.final_score().partial_cmp(&a.final_score()).unwrap_or(std::cmp::Ordering::Equal));
        let mut vector_items: Vec<Scored<Turn>> = vector_turns;
        vector_items.sort_by(|a, b| b.final_score().partial_cmp(&a.final_score()).unwrap_or(std::cmp::Ordering::Equal));

        let mut fact_idx = 0;
        let mut vector_idx = 0;
        while remaining > 0 {
            let next_fact_score = fact_items.get(fact_idx).map(Scored::final_score);
            let next_vector_score = vector_items.get(vector_idx).map(Scored::final_score);

            let take_fact = match (next_fact_score, next_vector_score) {
                (Some(f), Some(v)) => f >= v,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };

            if take_fact {
                let scored = &fact_items[fact_idx];
                let token_count = scored.item.token_count;
                if token_count <= remaining {
                    remaining -= token_count;
                    merged_rest.push(fact_to_context_item(&fact_items[fact_idx]));
                }
                fact_idx += 1;
            } else {
                let scored = &vector_items[vector_idx];
                let token_count = scored.item.token_count;
                if token_count <= remaining {
                    remaining -= token_count;
                    merged_rest.push(turn_to_context_item(&vector_items[vector_idx], ContextSource::Turn));
                }
                vector_idx += 1;
            }
        }

        let mut output: Vec<ContextItem> = selected_current
            .iter()
            .map(|turn| ContextItem {
                id: turn.id,
                content: turn.content.clone(),
                role: Some(turn.role),
                source: ContextSource::Turn,
                score: 1.0,
                token_count: turn.token_count,
                markers: turn.markers.clone(),
                timestamp: turn.created_at,
            })
            .collect();
        output.extend(admitted_marked.iter().map(|s| turn_to_context_item(s, ContextSource::Turn)));
        output.extend(merged_rest);

        Ok(output)
    }

    async fn relevance_for(
        &self,
        embedding_id: Option<Uuid>,
        query_vector: &[f32],
        query_has_signal: bool,
    ) -> Result<f32> {
        if !query_has_signal {
            return Ok(FALLBACK_RELEVANCE);
        }
        match embedding_id {
            Some(id) => match self.storage.get_embedding(id).await? {
                Some(record) => Ok(cosine_similarity(query_vector, &record.vector)),
                None => Ok(FALLBACK_RELEVANCE),
            },
            None => Ok(FALLBACK_RELEVANCE),
        }
    }
}

fn turn_to_context_item(scored: &Scored<Turn>, source: ContextSource) -> ContextItem {
    ContextItem {
        id: scored.item.id,
        content: scored.item.content.clone(),
        role: Some(scored.item.role),
        source,
        score: scored.final_score(),
        token_count: scored.item.token_count,
        markers: scored.item.markers.clone(),
        timestamp: scored.item.created_at,
    }
}

fn fact_to_context_item(scored: &Scored<Fact>) -> ContextItem {
    ContextItem {
        id: scored.item.id,
        content: scored.item.content.clone(),
        role: None,
        source: ContextSource::Fact,
        score: scored.final_score(),
        token_count: scored.item.token_count,
        markers: vec![scored.item.fact_type.to_string()],
        timestamp: scored.item.created_at,
    }
}

/// Select which current-episode turns fit the reservation, applying
/// overflow rules (keep marked turns first, then most-recent unmarked)
/// when the episode exceeds it. Returns the selection in chronological
/// order plus its total token count.
fn select_current_episode_turns(
    turns: &[Turn],
    reservation: usize,
    _token_counter: &dyn TokenCounter,
) -> (Vec<Turn>, usize) {
    let total_tokens: usize = turns.iter().map(|t| t.token_count).sum();

    if total_tokens <= reservation {
        let mut selected = turns.to_vec();
        selected.sort_by_key(|t| (t.episode_id, t.position));
        return (selected, total_tokens);
    }

    let mut marked: Vec<&Turn> = turns.iter().filter(|t| !t.markers.is_empty()).collect();
    marked.sort_by_key(|t| (t.episode_id, t.position));
    let mut unmarked: Vec<&Turn> = turns.iter().filter(|t| t.markers.is_empty()).collect();
    unmarked.sort_by_key(|t| std::cmp::Reverse((t.episode_id, t.position)));

    let mut selected: Vec<Turn> = Vec::new();
    let mut used = 0usize;
    for turn in marked {
        if used + turn.token_count > reservation {
            break;
        }
        used += turn.token_count;
        selected.push(turn.clone());
    }
    for turn in unmarked {
        if used + turn.token_count > reservation {
            break;
        }
        used += turn.token_count;
        selected.push(turn.clone());
    }

    selected.sort_by_key(|t| (t.episode_id, t.position));
    (selected, used)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::embeddings::NullEmbedder;
    use crate::ingestion::IngestionPipeline;
    use crate::storage::InMemoryStorage;
    use crate::tokens::HeuristicTokenCounter;
    use crate::types::Role;

    fn wiring() -> (IngestionPipeline, RecallPipeline) {
        let storage = Arc::new(InMemoryStorage::new());
        let config = MemoryConfig::default();
        let episode_manager = Arc::new(EpisodeManager::new("s1", storage.clone(), config.clone()));
        let embedder: Arc<dyn Embedder> = Arc::new(NullEmbedder::default());
        let token_counter: Arc<dyn TokenCounter> = Arc::new(HeuristicTokenCounter);

        let ingestion = IngestionPipeline::new(
            "s1",
            storage.clone(),
            embedder.clone(),
            token_counter.clone(),
            episode_manager.clone(),
            config.clone(),
        )
        .unwrap();
        let recall = RecallPipeline::new(
            "s1",
            storage,
            embedder,
            token_counter,
            episode_manager,
            config,
        );
        (ingestion, recall)
    }

    #[tokio::test]
    async fn basic_ingest_recall_returns_matching_turn_within_budget() {
        let (ingestion, recall) = wiring();
        ingestion
            .ingest("user", "What is Python?", None, None, None)
            .await
            .unwrap();
        ingestion
            .ingest("assistant", "Python is a programming language.", None, None, None)
            .await
            .unwrap();

        let items = recall.recall("Python", Some(1000), true, None).await.unwrap();
        assert!(items.iter().any(|i| i.content.contains("Python")));
        let total: usize = items.iter().map(|i| i.token_count).sum();
        assert!(total <= 1000);
    }

    #[tokio::test]
    async fn marker_auto_detection_is_overridden_by_explicit_markers() {
        let (ingestion, recall) = wiring();
        ingestion
            .ingest(
                "assistant",
                "Decision: Use Python.",
                None,
                Some(vec!["goal".to_string()]),
                None,
            )
            .await
            .unwrap();

        let items = recall.recall("Python", None, true, None).await.unwrap();
        let found = items.iter().find(|i| i.content.contains("Python")).unwrap();
        assert_eq!(found.markers, vec!["goal".to_string()]);
    }

    #[tokio::test]
    async fn empty_budget_smaller_than_any_candidate_yields_empty_result() {
        let (ingestion, recall) = wiring();
        ingestion
            .ingest("user", "x".repeat(100).as_str(), None, None, None)
            .await
            .unwrap();
        let items = recall.recall("x", Some(1), true, None).await.unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn select_current_episode_turns_preserves_chronological_order() {
        let episode_id = Uuid::new_v4();
        let make = |position: u64, tokens: usize, markers: Vec<String>| Turn {
            id: Uuid::new_v4(),
            session_id: "s1".into(),
            episode_id,
            role: Role::User,
            content: "x".into(),
            created_at: Utc::now(),
            actor_id: None,
            markers,
            token_count: tokens,
            embedding_id: None,
            position,
            metadata: Metadata::new(),
        };

        let turns = vec![
            make(0, 10, vec!["goal".into()]),
            make(1, 10, vec![]),
            make(2, 10, vec![]),
        ];

        let (selected, used) = select_current_episode_turns(&turns, 25, &HeuristicTokenCounter);
        assert_eq!(used, 20);
        assert_eq!(selected[0].position, 0);
        assert_eq!(selected[1].position, 2);
    }
}
