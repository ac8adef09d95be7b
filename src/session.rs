//! The facade: wires storage, providers, and the three pipelines into one
//! per-session handle. Every session is a single logical actor — callers
//! must not interleave `ingest`/`recall`/`close_episode` calls on the same
//! session, though independent sessions run freely in parallel.

use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::embeddings::Embedder;
use crate::episode_manager::EpisodeManager;
use crate::error::{Error, Result};
use crate::ingestion::IngestionPipeline;
use crate::recall::RecallPipeline;
use crate::reflection::ReflectionRunner;
use crate::reflector::ReflectorHandle;
use crate::storage::StorageBackend;
use crate::tokens::TokenCounter;
use crate::types::{ContextItem, Metadata, SessionStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Fresh,
    Initialized,
    Closed,
}

/// The entry point for one conversational session's memory.
pub struct MemorySession {
    session_id: String,
    storage: Arc<dyn StorageBackend>,
    episode_manager: Arc<EpisodeManager>,
    ingestion: IngestionPipeline,
    recall: RecallPipeline,
    reflection: Arc<ReflectionRunner>,
    state: Mutex<SessionState>,
}

impl MemorySession {
    /// Wire up a session. Does not touch storage — call [`Self::initialize`]
    /// before use.
    pub fn new(
        session_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        embedder: Arc<dyn Embedder>,
        token_counter: Arc<dyn TokenCounter>,
        reflector: ReflectorHandle,
        config: MemoryConfig,
    ) -> Result<Self> {
        config.validate()?;
        let session_id = session_id.into();

        let episode_manager = Arc::new(EpisodeManager::new(
            session_id.clone(),
            storage.clone(),
            config.clone(),
        ));
        let ingestion = IngestionPipeline::new(
            session_id.clone(),
            storage.clone(),
            embedder.clone(),
            token_counter.clone(),
            episode_manager.clone(),
            config.clone(),
        )?;
        let recall = RecallPipeline::new(
            session_id.clone(),
            storage.clone(),
            embedder.clone(),
            token_counter.clone(),
            episode_manager.clone(),
            config.clone(),
        );
        let reflection = Arc::new(ReflectionRunner::new(
            session_id.clone(),
            storage.clone(),
            embedder,
            token_counter,
            reflector,
            config,
        ));

        let reflection_for_callback = Arc::clone(&reflection);
        episode_manager.set_on_close(Arc::new(move |episode_id| {
            let reflection = Arc::clone(&reflection_for_callback);
            Box::pin(async move {
                reflection.spawn_background(episode_id);
            })
        }));

        Ok(Self {
            session_id,
            storage,
            episode_manager,
            ingestion,
            recall,
            reflection,
            state: Mutex::new(SessionState::Fresh),
        })
    }

    /// Prepare storage for use. Idempotent: a second call on an already
    /// initialized session is a no-op. Fails if the session was closed.
    pub async fn initialize(&self) -> Result<()> {
        {
            let state = self.state.lock();
            match *state {
                SessionState::Closed => return Err(Error::SessionNotFound),
                SessionState::Initialized => return Ok(()),
                SessionState::Fresh => {}
            }
        }
        self.storage.initialize().await?;
        *self.state.lock() = SessionState::Initialized;
        Ok(())
    }

    /// Close the current episode (triggering a final reflection), flush
    /// whatever remains in the carry-forward buffer, and release storage.
    /// Idempotent: a second call is a no-op. Best-effort — does not fail
    /// if a background reflection task was already cancelled.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == SessionState::Closed {
                return Ok(());
            }
            *state = SessionState::Closed;
        }

        let mut last_episode_id = self.episode_manager.current_episode_id();
        if last_episode_id.is_some() {
            last_episode_id = self
                .episode_manager
                .close_current_episode("session_close")
                .await?;
        }

        self.reflection.wait_pending().await;

        if let Some(episode_id) = last_episode_id {
            if let Some(episode) = self.storage.get_episode(episode_id).await? {
                self.reflection.flush(&episode).await;
            }
        }

        self.storage.close().await?;
        Ok(())
    }

    /// Validate, mark, embed, and persist one turn. See
    /// [`IngestionPipeline::ingest`].
    pub async fn ingest(
        &self,
        role: &str,
        content: &str,
        actor_id: Option<String>,
        explicit_markers: Option<Vec<String>>,
        metadata: Option<Metadata>,
    ) -> Result<Uuid> {
        self.ensure_usable()?;
        self.ingestion
            .ingest(role, content, actor_id, explicit_markers, metadata)
            .await
    }

    /// Assemble token-budgeted context for `query`. See
    /// [`RecallPipeline::recall`].
    pub async fn recall(
        &self,
        query: &str,
        token_budget: Option<usize>,
        include_current_episode: bool,
        min_relevance: Option<f32>,
    ) -> Result<Vec<ContextItem>> {
        self.ensure_usable()?;
        self.recall
            .recall(query, token_budget, include_current_episode, min_relevance)
            .await
    }

    /// Manually close the current episode, if one is open. Reflection
    /// over the closed episode runs as a background task; call
    /// [`Self::wait_for_background_reflection`] to observe its effects
    /// deterministically.
    pub async fn close_episode(&self, reason: impl Into<String>) -> Result<Option<Uuid>> {
        self.ensure_usable()?;
        self.episode_manager.close_current_episode(reason).await
    }

    /// Await every reflection task spawned by an episode close so far.
    pub async fn wait_for_background_reflection(&self) {
        self.reflection.wait_pending().await;
    }

    /// Aggregate counters for this session.
    pub async fn get_session_stats(&self) -> Result<SessionStats> {
        self.ensure_usable()?;
        self.storage.get_session_stats(&self.session_id).await
    }

    /// This session's id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Id of the currently open episode, if any.
    #[must_use]
    pub fn current_episode_id(&self) -> Option<Uuid> {
        self.episode_manager.current_episode_id()
    }

    fn ensure_usable(&self) -> Result<()> {
        match *self.state.lock() {
            SessionState::Closed => Err(Error::SessionNotFound),
            SessionState::Fresh => Err(Error::validation("session", "call initialize() before use")),
            SessionState::Initialized => Ok(()),
        }
    }
}
