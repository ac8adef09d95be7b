//! The reflection provider protocol: a base `Reflector` every provider must
//! implement, and an optional `ConsolidatingReflector` capability for
//! providers that can mutate prior facts instead of only adding new ones.
//!
//! Whether a given reflector supports consolidation is decided once, at
//! construction, via [`ReflectorHandle`] — never discovered at call time.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Episode, Fact, MarkerType, Metadata, Turn};

/// A candidate fact as returned by a reflector, before the runner assigns
/// it an id, timestamp, token count, or embedding.
#[derive(Debug, Clone)]
pub struct ReflectedFact {
    /// The distilled statement.
    pub content: String,
    /// Category for this fact.
    pub fact_type: MarkerType,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Caller-supplied metadata to carry onto the persisted fact.
    pub metadata: Metadata,
}

impl ReflectedFact {
    /// Construct a reflected fact with default (decision) type, full
    /// confidence, and no metadata.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            fact_type: MarkerType::Decision,
            confidence: 1.0,
            metadata: Metadata::new(),
        }
    }
}

/// One consolidation action a `ConsolidatingReflector` returns for a
/// scoped prior fact (or for wholly new content).
#[derive(Debug, Clone)]
pub struct ConsolidationAction {
    /// What to do.
    pub action: crate::types::ConsolidationActionType,
    /// New content for ADD/UPDATE; ignored for KEEP/REMOVE.
    pub content: String,
    /// Category for new content.
    pub fact_type: MarkerType,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// The prior fact this action targets, for KEEP/UPDATE/REMOVE.
    pub source_fact_id: Option<Uuid>,
    /// Free-text justification, surfaced only via tracing.
    pub reason: String,
}

/// Every reflector must be able to extract facts from a closed episode
/// with no knowledge of prior facts.
#[async_trait]
pub trait Reflector: Send + Sync {
    /// Extract candidate facts from `turns` belonging to `episode`.
    async fn reflect(&self, episode: &Episode, turns: &[Turn]) -> Result<Vec<ReflectedFact>>;
}

/// An optional capability: a reflector that can mutate prior facts
/// (keep/update/add/remove) instead of only ever adding new ones.
#[async_trait]
pub trait ConsolidatingReflector: Reflector {
    /// Decide keep/update/add/remove actions over `prior_facts`, given the
    /// new `turns` from the closing `episode`.
    async fn reflect_with_consolidation(
        &self,
        episode: &Episode,
        turns: &[Turn],
        prior_facts: &[Fact],
    ) -> Result<Vec<ConsolidationAction>>;
}

/// Declines to produce any facts. The default reflector for sessions that
/// don't configure one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReflector;

#[async_trait]
impl Reflector for NullReflector {
    async fn reflect(&self, _episode: &Episode, _turns: &[Turn]) -> Result<Vec<ReflectedFact>> {
        Ok(Vec::new())
    }
}

/// Which capability a session's configured reflector has, chosen once at
/// construction rather than probed at each reflection call.
#[derive(Clone)]
pub enum ReflectorHandle {
    /// Only the base `reflect` call is available.
    Legacy(Arc<dyn Reflector>),
    /// `reflect_with_consolidation` is available in addition to `reflect`.
    Consolidating(Arc<dyn ConsolidatingReflector>),
}

impl ReflectorHandle {
    /// Wrap a reflector that only implements the base capability.
    #[must_use]
    pub fn legacy(reflector: Arc<dyn Reflector>) -> Self {
        Self::Legacy(reflector)
    }

    /// Wrap a reflector that also implements consolidation.
    #[must_use]
    pub fn consolidating(reflector: Arc<dyn ConsolidatingReflector>) -> Self {
        Self::Consolidating(reflector)
    }

    /// Whether this handle can run the consolidation path.
    #[must_use]
    pub fn supports_consolidation(&self) -> bool {
        matches!(self, Self::Consolidating(_))
    }

    /// Run the base `reflect` call, regardless of which variant this is.
    pub async fn reflect(&self, episode: &Episode, turns: &[Turn]) -> Result<Vec<ReflectedFact>> {
        match self {
            Self::Legacy(r) => r.reflect(episode, turns).await,
            Self::Consolidating(r) => r.reflect(episode, turns).await,
        }
    }

    /// Run the consolidation call. Only valid when
    /// [`Self::supports_consolidation`] is `true`.
    pub async fn reflect_with_consolidation(
        &self,
        episode: &Episode,
        turns: &[Turn],
        prior_facts: &[Fact],
    ) -> Result<Vec<ConsolidationAction>> {
        match self {
            Self::Consolidating(r) => {
                r.reflect_with_consolidation(episode, turns, prior_facts).await
            }
            Self::Legacy(_) => Ok(Vec::new()),
        }
    }
}

impl Default for ReflectorHandle {
    fn default() -> Self {
        Self::legacy(Arc::new(NullReflector))
    }
}
