//! Opens and closes episodes, applying the boundary rules in a fixed
//! order and invoking a caller-registered on-close callback. Every
//! session owns exactly one `EpisodeManager`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::types::{Episode, Role, Turn};

/// A boxed, cloneable async callback invoked with the id of an episode
/// that was just closed. Must not panic and must catch its own errors —
/// a failing callback must never prevent the close from completing.
pub type OnCloseCallback = Arc<dyn Fn(Uuid) -> BoxFuture<'static, ()> + Send + Sync>;

struct State {
    episode: Option<Episode>,
    last_turn_at: Option<DateTime<Utc>>,
}

/// Tracks the single open episode for one session and the boundary rules
/// that close it.
pub struct EpisodeManager {
    session_id: String,
    storage: Arc<dyn StorageBackend>,
    config: MemoryConfig,
    state: Mutex<State>,
    on_close: Mutex<Option<OnCloseCallback>>,
}

impl EpisodeManager {
    /// Construct a manager with no open episode.
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            storage,
            config,
            state: Mutex::new(State {
                episode: None,
                last_turn_at: None,
            }),
            on_close: Mutex::new(None),
        }
    }

    /// Register the callback invoked on every close, manual or automatic.
    /// Replaces any previously registered callback.
    pub fn set_on_close(&self, callback: OnCloseCallback) {
        *self.on_close.lock() = Some(callback);
    }

    /// Id of the currently open episode, if any.
    #[must_use]
    pub fn current_episode_id(&self) -> Option<Uuid> {
        self.state.lock().episode.as_ref().map(|e| e.id)
    }

    /// Which boundary rule, if any, fires against `turn` given the current
    /// open `episode`. Evaluated in spec order: max turns, time gap,
    /// tool-result close, content patterns.
    fn boundary_rule_fires(
        &self,
        episode: &Episode,
        turn: &Turn,
        last_turn_at: Option<DateTime<Utc>>,
    ) -> Option<&'static str> {
        let boundary = &self.config.episode_boundary;

        if episode.turn_count >= boundary.max_turns {
            return Some("max_turns");
        }
        if let Some(last) = last_turn_at {
            if (turn.created_at - last).num_seconds() > boundary.max_time_gap_seconds {
                return Some("max_time_gap");
            }
        }
        if boundary.close_on_tool_result && turn.role == Role::Tool {
            return Some("close_on_tool_result");
        }
        if boundary.matches_close_pattern(&turn.content) {
            return Some("close_on_pattern");
        }
        None
    }

    /// Assign `turn` to an episode, closing the current one first if a
    /// boundary rule fires, opening a fresh one if none is open. Sets
    /// `turn.episode_id` and returns it.
    #[instrument(skip(self, turn), fields(session_id = %self.session_id))]
    pub async fn assign_episode(&self, turn: &mut Turn) -> Result<Uuid> {
        let should_close = {
            let state = self.state.lock();
            state
                .episode
                .as_ref()
                .and_then(|episode| self.boundary_rule_fires(episode, turn, state.last_turn_at))
        };

        if let Some(reason) = should_close {
            debug!(reason, "boundary rule fired, closing episode before assigning turn");
            self.close_current_episode(reason).await?;
        }

        let (mut episode, is_new) = {
            let mut state = self.state.lock();
            if state.episode.is_none() {
                state.episode = Some(Episode::new(self.session_id.clone()));
                (state.episode.clone().expect("just assigned"), true)
            } else {
                (
                    state.episode.clone().expect("checked is_none above"),
                    false,
                )
            }
        };

        if is_new {
            self.storage.save_episode(&episode).await?;
        }

        turn.episode_id = episode.id;
        episode.record_turn(turn);
        self.storage.update_episode(&episode).await?;

        let episode_id = episode.id;
        {
            let mut state = self.state.lock();
            state.episode = Some(episode);
            state.last_turn_at = Some(turn.created_at);
        }

        Ok(episode_id)
    }

    /// Close the current episode, if one is open. Invokes the on-close
    /// callback after the close is persisted; callback failures cannot
    /// prevent the close from having completed.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn close_current_episode(&self, reason: impl Into<String>) -> Result<Option<Uuid>> {
        let mut episode = {
            let mut state = self.state.lock();
            match state.episode.take() {
                Some(e) => e,
                None => return Ok(None),
            }
        };

        episode.close(reason.into());
        self.storage.update_episode(&episode).await?;
        let episode_id = episode.id;

        debug!(episode_id = %episode_id, "episode closed");

        let callback = self.on_close.lock().clone();
        if let Some(cb) = callback {
            cb(episode_id).await;
        }

        Ok(Some(episode_id))
    }

    /// All turns assigned to the currently open episode, in position
    /// order. Empty if no episode is open.
    pub async fn get_current_episode_turns(&self) -> Result<Vec<Turn>> {
        match self.current_episode_id() {
            Some(id) => self.storage.get_turns_by_episode(id).await,
            None => Ok(Vec::new()),
        }
    }
}
