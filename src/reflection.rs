//! Drains closed episodes into L2 facts: carries short episodes forward
//! in a buffer, dispatches to the legacy or consolidation path depending
//! on what the configured reflector supports, and applies supersession.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::coverage::{extract_keywords, has_sufficient_overlap};
use crate::embeddings::{cosine_similarity, is_zero_vector, Embedder};
use crate::error::{Error, Result};
use crate::reflector::ReflectorHandle;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::storage::StorageBackend;
use crate::tokens::TokenCounter;
use crate::types::{
    removed_by_sentinel, ConsolidationActionType, Episode, Fact, Metadata, Turn,
};

const TRACE_DUMP_MAX_ITEMS: usize = 20;
const TRACE_DUMP_TRUNCATE_CHARS: usize = 200;

/// A record of one reflection call, delivered to a caller-installed trace
/// callback on a best-effort basis.
#[derive(Debug, Clone)]
pub struct ReflectionTrace {
    /// The episode that triggered this reflection.
    pub episode_id: Uuid,
    /// Which path ran.
    pub mode: &'static str,
    /// Number of turns reflected on (buffered + closing).
    pub input_turn_count: usize,
    /// Truncated dump of the reflected turns' content.
    pub turn_dump: Vec<String>,
    /// Truncated dump of prior fact content (consolidation only).
    pub prior_fact_dump: Vec<String>,
    /// Number of prior facts scoped into the call (consolidation only).
    pub scoped_fact_count: Option<usize>,
    /// Debug dump of whatever the provider returned.
    pub raw_dump: String,
    /// Ids of facts newly persisted by this call.
    pub saved_fact_ids: Vec<Uuid>,
    /// Ids of prior facts superseded by this call.
    pub superseded_fact_ids: Vec<Uuid>,
    /// Wall-clock time spent in this reflection call.
    pub elapsed_ms: u64,
}

/// A caller-installed hook for observing reflection calls. Must not be
/// relied upon for correctness: failures are logged and otherwise
/// ignored.
pub type TraceCallback = Arc<dyn Fn(&ReflectionTrace) -> Result<()> + Send + Sync>;

fn truncated_dump(turns: impl Iterator<Item = String>) -> Vec<String> {
    turns
        .take(TRACE_DUMP_MAX_ITEMS)
        .map(|s| {
            if s.chars().count() > TRACE_DUMP_TRUNCATE_CHARS {
                s.chars().take(TRACE_DUMP_TRUNCATE_CHARS).collect::<String>() + "…"
            } else {
                s
            }
        })
        .collect()
}

/// Drains closed episodes into facts, one session at a time.
pub struct ReflectionRunner {
    session_id: String,
    storage: Arc<dyn StorageBackend>,
    embedder: Arc<dyn Embedder>,
    token_counter: Arc<dyn TokenCounter>,
    reflector: ReflectorHandle,
    config: MemoryConfig,
    carry_forward: Mutex<Vec<Turn>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    trace_callback: Mutex<Option<TraceCallback>>,
    embed_retry: RetryPolicy,
    reflect_retry: RetryPolicy,
}

impl ReflectionRunner {
    /// Construct a runner with an empty carry-forward buffer.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn Embedder>,
        token_counter: Arc<dyn TokenCounter>,
        reflector: ReflectorHandle,
        config: MemoryConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            storage,
            embedder,
            token_counter,
            reflector,
            config,
            carry_forward: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            trace_callback: Mutex::new(None),
            embed_retry: RetryPolicy::with_config(RetryConfig::default()),
            reflect_retry: RetryPolicy::with_config(RetryConfig::for_reflector()),
        }
    }

    /// Install (or replace) the trace callback.
    pub fn set_trace_callback(&self, callback: TraceCallback) {
        *self.trace_callback.lock() = Some(callback);
    }

    /// Run reflection inline for a just-closed episode. Combines this
    /// episode's turns with whatever is buffered from prior short
    /// episodes; if the combined count is still below
    /// `min_episode_turns`, persists the buffer and returns without
    /// producing facts.
    #[instrument(skip(self), fields(session_id = %self.session_id, episode_id = %episode_id))]
    pub async fn on_episode_closed(&self, episode_id: Uuid) -> Result<()> {
        if !self.config.reflection.enabled {
            return Ok(());
        }

        let episode = self
            .storage
            .get_episode(episode_id)
            .await?
            .ok_or(Error::EpisodeNotFound(episode_id))?;
        let closing_turns = self.storage.get_turns_by_episode(episode_id).await?;

        let mut combined = {
            let mut buffer = self.carry_forward.lock();
            std::mem::take(&mut *buffer)
        };
        combined.extend(closing_turns);

        if combined.len() < self.config.reflection.min_episode_turns as usize {
            *self.carry_forward.lock() = combined;
            return Ok(());
        }

        self.reflect_combined(&episode, combined).await
    }

    /// Spawn `on_episode_closed` as a tracked background task. Errors are
    /// logged and otherwise swallowed.
    pub fn spawn_background(self: &Arc<Self>, episode_id: Uuid) {
        let runner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(error) = runner.on_episode_closed(episode_id).await {
                warn!(error = %error, episode_id = %episode_id, "background reflection failed");
            }
        });
        self.pending.lock().push(handle);
    }

    /// Await every currently tracked background reflection task.
    pub async fn wait_pending(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Cancel every currently tracked background reflection task.
    pub fn cancel_pending(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending.lock());
        for handle in handles {
            handle.abort();
        }
    }

    /// Force-reflect whatever remains in the carry-forward buffer,
    /// bypassing `min_episode_turns`. Used during session close. Failures
    /// are logged and swallowed rather than returned.
    pub async fn flush(&self, episode: &Episode) {
        let buffer = std::mem::take(&mut *self.carry_forward.lock());
        if buffer.is_empty() {
            return;
        }
        if let Err(error) = self.reflect_combined(episode, buffer).await {
            warn!(error = %error, episode_id = %episode.id, "flush reflection failed, buffer discarded");
        }
    }

    async fn reflect_combined(&self, episode: &Episode, combined: Vec<Turn>) -> Result<()> {
        let start = Instant::now();
        let prior_facts = self
            .storage
            .get_active_facts_by_session(&self.session_id)
            .await?;

        if self.reflector.supports_consolidation() && !prior_facts.is_empty() {
            self.run_consolidation(episode, &combined, &prior_facts, start).await
        } else {
            self.run_legacy(episode, &combined, start).await
        }
    }

    async fn run_legacy(&self, episode: &Episode, combined: &[Turn], start: Instant) -> Result<()> {
        let reflected = self
            .reflect_retry
            .execute(|| self.reflector.reflect(episode, combined))
            .await
            .map_err(|source| Error::Reflection { episode_id: episode.id, source: source.into() })?;

        let raw_dump = format!("{reflected:?}");
        let mut saved_ids = Vec::new();

        for candidate in reflected
            .into_iter()
            .take(self.config.reflection.max_facts_per_episode)
        {
            if candidate.confidence < self.config.reflection.min_confidence {
                continue;
            }
            let fact_id = self
                .persist_new_fact(
                    episode,
                    &candidate.content,
                    candidate.fact_type,
                    candidate.confidence,
                    candidate.metadata,
                    Vec::new(),
                )
                .await?;
            saved_ids.push(fact_id);
        }

        self.emit_trace(ReflectionTrace {
            episode_id: episode.id,
            mode: "legacy",
            input_turn_count: combined.len(),
            turn_dump: truncated_dump(combined.iter().map(|t| t.content.clone())),
            prior_fact_dump: Vec::new(),
            scoped_fact_count: None,
            raw_dump,
            saved_fact_ids: saved_ids,
            superseded_fact_ids: Vec::new(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        });

        Ok(())
    }

    async fn run_consolidation(
        &self,
        episode: &Episode,
        combined: &[Turn],
        prior_facts: &[Fact],
        start: Instant,
    ) -> Result<()> {
        let scoped = self.scope_prior_facts(combined, prior_facts).await?;

        let actions = self
            .reflect_retry
            .execute(|| self.reflector.reflect_with_consolidation(episode, combined, &scoped))
            .await
            .map_err(|source| Error::Reflection { episode_id: episode.id, source: source.into() })?;

        if actions.is_empty() {
            warn!(episode_id = %episode.id, "consolidation returned zero actions, falling back to legacy reflection");
            return self.run_legacy(episode, combined, start).await;
        }

        self.check_coverage(episode, &scoped, &actions);

        let raw_dump = format!("{actions:?}");
        let scoped_by_id: HashMap<Uuid, Fact> = scoped.iter().map(|f| (f.id, f.clone())).collect();
        let mut saved_ids = Vec::new();
        let mut superseded_ids = Vec::new();

        for action in &actions {
            match action.action {
                ConsolidationActionType::Keep => {}
                ConsolidationActionType::Add => {
                    if action.confidence < self.config.reflection.min_confidence {
                        continue;
                    }
                    if self.is_duplicate(&action.content, &scoped).await? {
                        continue;
                    }
                    let fact_id = self
                        .persist_new_fact(
                            episode,
                            &action.content,
                            action.fact_type,
                            action.confidence,
                            Metadata::new(),
                            Vec::new(),
                        )
                        .await?;
                    saved_ids.push(fact_id);
                }
                ConsolidationActionType::Update => {
                    let Some(source_id) = action.source_fact_id else {
                        warn!(episode_id = %episode.id, "UPDATE action missing source_fact_id, skipping");
                        continue;
                    };
                    let Some(old_fact) = scoped_by_id.get(&source_id) else {
                        warn!(episode_id = %episode.id, fact_id = %source_id, "UPDATE action references unknown source_fact_id, skipping");
                        continue;
                    };
                    if action.confidence < self.config.reflection.min_confidence {
                        continue;
                    }
                    let new_id = self
                        .persist_new_fact(
                            episode,
                            &action.content,
                            action.fact_type,
                            action.confidence,
                            Metadata::new(),
                            vec![old_fact.id],
                        )
                        .await?;
                    let mut updated_old = old_fact.clone();
                    updated_old.superseded_by = Some(new_id.to_string());
                    self.storage.update_fact(&updated_old).await?;
                    saved_ids.push(new_id);
                    superseded_ids.push(old_fact.id);
                }
                ConsolidationActionType::Remove => {
                    let Some(source_id) = action.source_fact_id else {
                        warn!(episode_id = %episode.id, "REMOVE action missing source_fact_id, skipping");
                        continue;
                    };
                    let Some(old_fact) = scoped_by_id.get(&source_id) else {
                        warn!(episode_id = %episode.id, fact_id = %source_id, "REMOVE action references unknown source_fact_id, skipping");
                        continue;
                    };
                    let mut updated_old = old_fact.clone();
                    updated_old.superseded_by = Some(removed_by_sentinel(episode.id));
                    self.storage.update_fact(&updated_old).await?;
                    superseded_ids.push(old_fact.id);
                }
            }
        }

        self.emit_trace(ReflectionTrace {
            episode_id: episode.id,
            mode: "consolidation",
            input_turn_count: combined.len(),
            turn_dump: truncated_dump(combined.iter().map(|t| t.content.clone())),
            prior_fact_dump: truncated_dump(scoped.iter().map(|f| f.content.clone())),
            scoped_fact_count: Some(scoped.len()),
            raw_dump,
            saved_fact_ids: saved_ids,
            superseded_fact_ids: superseded_ids,
            elapsed_ms: start.elapsed().as_millis() as u64,
        });

        Ok(())
    }

    async fn scope_prior_facts(&self, combined: &[Turn], prior_facts: &[Fact]) -> Result<Vec<Fact>> {
        let concat_text = combined
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let query_vectors = self
            .embed_retry
            .execute(|| self.embedder.embed(std::slice::from_ref(&concat_text)))
            .await?;
        let query_vector = query_vectors.into_iter().next().unwrap_or_default();

        if is_zero_vector(&query_vector) {
            return Ok(prior_facts.to_vec());
        }

        let mut scoped = Vec::new();
        for fact in prior_facts {
            match fact.embedding_id {
                None => scoped.push(fact.clone()),
                Some(id) => match self.storage.get_embedding(id).await? {
                    Some(record)
                        if cosine_similarity(&query_vector, &record.vector)
                            >= self.config.reflection.consolidation_similarity_threshold =>
                    {
                        scoped.push(fact.clone());
                    }
                    None => scoped.push(fact.clone()),
                    _ => {}
                },
            }
        }

        if scoped.is_empty() && !prior_facts.is_empty() {
            return Ok(prior_facts.to_vec());
        }
        Ok(scoped)
    }

    fn check_coverage(
        &self,
        episode: &Episode,
        scoped: &[Fact],
        actions: &[crate::reflector::ConsolidationAction],
    ) {
        let action_keywords: HashSet<String> = actions
            .iter()
            .flat_map(|a| extract_keywords(&a.content))
            .collect();
        let referenced: HashSet<Uuid> = actions.iter().filter_map(|a| a.source_fact_id).collect();

        for fact in scoped {
            if referenced.contains(&fact.id) {
                continue;
            }
            let fact_keywords = extract_keywords(&fact.content);
            if !has_sufficient_overlap(&fact_keywords, &action_keywords) {
                warn!(
                    fact_id = %fact.id,
                    episode_id = %episode.id,
                    "scoped fact neither referenced nor covered by keyword overlap"
                );
            }
        }
    }

    async fn is_duplicate(&self, content: &str, prior_facts: &[Fact]) -> Result<bool> {
        if self.config.reflection.dedup_similarity_threshold >= 1.0 {
            return Ok(false);
        }
        let owned = content.to_string();
        let vectors = self
            .embed_retry
            .execute(|| self.embedder.embed(std::slice::from_ref(&owned)))
            .await?;
        let Some(vector) = vectors.into_iter().next() else {
            return Ok(false);
        };
        if is_zero_vector(&vector) {
            return Ok(false);
        }
        for fact in prior_facts {
            if let Some(id) = fact.embedding_id {
                if let Some(record) = self.storage.get_embedding(id).await? {
                    if cosine_similarity(&vector, &record.vector)
                        >= self.config.reflection.dedup_similarity_threshold
                    {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    async fn persist_new_fact(
        &self,
        episode: &Episode,
        content: &str,
        fact_type: crate::types::MarkerType,
        confidence: f32,
        metadata: Metadata,
        supersedes: Vec<Uuid>,
    ) -> Result<Uuid> {
        let token_count = self.token_counter.count(content);
        let fact_id = Uuid::new_v4();
        let mut fact = Fact {
            id: fact_id,
            session_id: self.session_id.clone(),
            episode_id: episode.id,
            content: content.to_string(),
            created_at: Utc::now(),
            fact_type,
            confidence,
            embedding_id: None,
            token_count,
            superseded_by: None,
            supersedes,
            metadata,
        };

        match self
            .embed_retry
            .execute(|| self.embedder.embed(std::slice::from_ref(&fact.content)))
            .await
        {
            Ok(vectors) => {
                if let Some(vector) = vectors.into_iter().next() {
                    let embedding_id = Uuid::new_v4();
                    let mut embed_metadata = Metadata::new();
                    embed_metadata.insert("session_id".into(), fact.session_id.clone().into());
                    embed_metadata.insert("episode_id".into(), fact.episode_id.to_string().into());
                    embed_metadata.insert("fact_id".into(), fact.id.to_string().into());
                    embed_metadata.insert("type".into(), "fact".into());
                    embed_metadata.insert("fact_type".into(), fact.fact_type.to_string().into());
                    self.storage
                        .save_embedding(embedding_id, vector, embed_metadata)
                        .await?;
                    fact.embedding_id = Some(embedding_id);
                }
            }
            Err(error) => {
                warn!(error = %error, fact_id = %fact.id, "embedding failed while saving a reflected fact");
            }
        }

        self.storage.save_fact(&fact).await?;
        Ok(fact_id)
    }

    fn emit_trace(&self, trace: ReflectionTrace) {
        let callback = self.trace_callback.lock().clone();
        if let Some(cb) = callback {
            if let Err(error) = cb(&trace) {
                warn!(error = %error, episode_id = %trace.episode_id, "reflection trace callback failed");
            }
        }
    }
}
