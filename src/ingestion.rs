//! Validates, marks, tokenizes, assigns to an episode, embeds, and
//! persists one turn at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::embeddings::Embedder;
use crate::episode_manager::EpisodeManager;
use crate::error::Result;
use crate::markers::resolve_markers;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::storage::StorageBackend;
use crate::tokens::TokenCounter;
use crate::types::{Metadata, Turn};
use crate::validation::{validate_content, validate_markers, validate_role, validate_session_id};

/// Turns one `ingest` call into a persisted, embedded, episode-assigned
/// [`Turn`].
pub struct IngestionPipeline {
    session_id: String,
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn Embedder>,
    token_counter: Arc<dyn TokenCounter>,
    episode_manager: Arc<EpisodeManager>,
    config: MemoryConfig,
    next_position: AtomicU64,
    retry_policy: RetryPolicy,
}

impl IngestionPipeline {
    /// Construct a pipeline for `session_id`, starting position numbering
    /// at zero.
    pub fn new(
        session_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn Embedder>,
        token_counter: Arc<dyn TokenCounter>,
        episode_manager: Arc<EpisodeManager>,
        config: MemoryConfig,
    ) -> Result<Self> {
        Ok(Self {
            session_id: validate_session_id(&session_id.into())?,
            storage,
            embedder,
            token_counter,
            episode_manager,
            config,
            next_position: AtomicU64::new(0),
            retry_policy: RetryPolicy::with_config(RetryConfig::default()),
        })
    }

    /// Validate, mark, tokenize, assign an episode to, embed, and persist
    /// a new turn. Returns the persisted turn's id.
    #[instrument(skip(self, content, metadata), fields(session_id = %self.session_id))]
    pub async fn ingest(
        &self,
        role: &str,
        content: &str,
        actor_id: Option<String>,
        explicit_markers: Option<Vec<String>>,
        metadata: Option<Metadata>,
    ) -> Result<Uuid> {
        let role = validate_role(role)?;
        let content = validate_content(content, self.config.max_content_length)?;
        if let Some(markers) = &explicit_markers {
            validate_markers(markers)?;
        }

        let markers = resolve_markers(
            &content,
            explicit_markers.as_deref(),
            self.config.auto_detect_markers,
        );
        let token_count = self.token_counter.count(&content);
        let position = self.next_position.fetch_add(1, Ordering::SeqCst);

        let mut turn = Turn {
            id: Uuid::new_v4(),
            session_id: self.session_id.clone(),
            episode_id: Uuid::nil(),
            role,
            content,
            created_at: Utc::now(),
            actor_id,
            markers,
            token_count,
            embedding_id: None,
            position,
            metadata: metadata.unwrap_or_default(),
        };

        self.episode_manager.assign_episode(&mut turn).await?;

        let vectors = self
            .retry_policy
            .execute(|| self.embedder.embed(std::slice::from_ref(&turn.content)))
            .await?;
        if let Some(vector) = vectors.into_iter().next() {
            let embedding_id = Uuid::new_v4();
            let mut embed_metadata = Metadata::new();
            embed_metadata.insert("session_id".into(), Value::from(self.session_id.clone()));
            embed_metadata.insert("episode_id".into(), Value::from(turn.episode_id.to_string()));
            embed_metadata.insert("turn_id".into(), Value::from(turn.id.to_string()));
            embed_metadata.insert("type".into(), Value::from("turn"));
            embed_metadata.insert("role".into(), Value::from(turn.role.to_string()));
            embed_metadata.insert("has_markers".into(), Value::from(!turn.markers.is_empty()));
            self.storage
                .save_embedding(embedding_id, vector, embed_metadata)
                .await?;
            turn.embedding_id = Some(embedding_id);
        } else {
            warn!(turn_id = %turn.id, "embedder returned no vector for a single-text batch");
        }

        self.storage.save_turn(&turn).await?;
        Ok(turn.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::NullEmbedder;
    use crate::storage::InMemoryStorage;
    use crate::tokens::HeuristicTokenCounter;

    fn pipeline() -> IngestionPipeline {
        let storage = Arc::new(InMemoryStorage::new());
        let config = MemoryConfig::default();
        let episode_manager = Arc::new(EpisodeManager::new("s1", storage.clone(), config.clone()));
        IngestionPipeline::new(
            "s1",
            storage,
            Arc::new(NullEmbedder::default()),
            Arc::new(HeuristicTokenCounter),
            episode_manager,
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ingest_assigns_increasing_positions() {
        let pipeline = pipeline();
        let id1 = pipeline
            .ingest("user", "first", None, None, None)
            .await
            .unwrap();
        let id2 = pipeline
            .ingest("user", "second", None, None, None)
            .await
            .unwrap();
        assert_ne!(id1, id2);

        let turn1 = pipeline.storage.get_turn(id1).await.unwrap().unwrap();
        let turn2 = pipeline.storage.get_turn(id2).await.unwrap().unwrap();
        assert!(turn2.position > turn1.position);
    }

    #[tokio::test]
    async fn explicit_markers_override_auto_detection() {
        let pipeline = pipeline();
        let id = pipeline
            .ingest(
                "assistant",
                "Decision: use Python.",
                None,
                Some(vec!["goal".to_string()]),
                None,
            )
            .await
            .unwrap();
        let turn = pipeline.storage.get_turn(id).await.unwrap().unwrap();
        assert_eq!(turn.markers, vec!["goal".to_string()]);
    }

    #[tokio::test]
    async fn rejects_invalid_role() {
        let pipeline = pipeline();
        let result = pipeline.ingest("narrator", "hi", None, None, None).await;
        assert!(result.is_err());
    }
}
