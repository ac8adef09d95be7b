//! Crate-wide error taxonomy.

use thiserror::Error;
use uuid::Uuid;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A config object failed its own `validate()`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An input failed validation before any state was touched.
    #[error("validation error on field '{field}': {message}")]
    Validation {
        /// The offending field name.
        field: String,
        /// Human-readable explanation.
        message: String,
    },

    /// A storage backend operation failed.
    #[error("storage error during '{operation}': {source}")]
    Storage {
        /// Name of the storage operation that failed.
        operation: String,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// An embedder or reflector call failed.
    #[error("provider error ({provider}, retryable={retryable}): {source}")]
    Provider {
        /// Which provider failed (e.g. `"embedder"`, `"reflector"`).
        provider: String,
        /// Whether a retry is expected to help.
        retryable: bool,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// A recall call's output could not fit even a single candidate.
    #[error("token budget exceeded: budget={budget}, required={required}")]
    TokenBudgetExceeded {
        /// The caller-supplied or default budget.
        budget: usize,
        /// Tokens required by the smallest admissible candidate.
        required: usize,
    },

    /// No session with the given id is known to the facade.
    #[error("session not found")]
    SessionNotFound,

    /// No episode with the given id exists.
    #[error("episode not found: {0}")]
    EpisodeNotFound(Uuid),

    /// No turn with the given id exists.
    #[error("turn not found: {0}")]
    TurnNotFound(Uuid),

    /// Reflection over a closed episode failed.
    #[error("reflection failed for episode {episode_id}: {source}")]
    Reflection {
        /// The episode being reflected on.
        episode_id: Uuid,
        /// Underlying cause.
        #[source]
        source: anyhow::Error,
    },

    /// A retried provider call never succeeded.
    #[error("retry exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    /// Whether retrying the operation that produced this error might
    /// succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider { retryable: true, .. })
    }

    /// Whether this error represents a missing entity (session, episode,
    /// or turn) rather than a structural failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound | Error::EpisodeNotFound(_) | Error::TurnNotFound(_)
        )
    }

    /// Build a [`Error::Validation`] for `field`.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build a [`Error::Storage`] for `operation`.
    pub fn storage(operation: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Error::Storage {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Build a [`Error::Provider`] error.
    pub fn provider(
        provider: impl Into<String>,
        retryable: bool,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Error::Provider {
            provider: provider.into(),
            retryable,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn provider_error_is_retryable_only_when_marked() {
        let retryable = Error::provider("embedder", true, anyhow!("timeout"));
        let not = Error::provider("embedder", false, anyhow!("bad request"));
        assert!(retryable.is_retryable());
        assert!(!not.is_retryable());
    }

    #[test]
    fn not_found_variants_are_recognised() {
        assert!(Error::SessionNotFound.is_not_found());
        assert!(Error::EpisodeNotFound(Uuid::new_v4()).is_not_found());
        assert!(Error::TurnNotFound(Uuid::new_v4()).is_not_found());
        assert!(!Error::Configuration("x".into()).is_not_found());
    }

    #[test]
    fn validation_helper_carries_field_name() {
        let err = Error::validation("content", "must not be empty");
        match err {
            Error::Validation { field, .. } => assert_eq!(field, "content"),
            _ => panic!("expected Validation variant"),
        }
    }

    #[test]
    fn display_includes_context() {
        let err = Error::TokenBudgetExceeded {
            budget: 10,
            required: 50,
        };
        let rendered = err.to_string();
        assert!(rendered.contains("10"));
        assert!(rendered.contains("50"));
    }
}
