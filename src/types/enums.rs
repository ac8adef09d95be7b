//! Core enumerations of the data model: who produced a turn, whether an
//! episode is still accumulating turns, and what kind of marker or context
//! source a candidate carries.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human operator of the session.
    User,
    /// The agent itself.
    Assistant,
    /// A tool invocation result.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

/// Lifecycle state of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    /// Still accumulating turns.
    Open,
    /// No longer accepting turns; immutable.
    Closed,
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EpisodeStatus::Open => "open",
            EpisodeStatus::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// The built-in importance markers. Anything else is a custom marker
/// (`custom:<name>`), represented at the call boundary as a plain string
/// rather than a variant of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerType {
    /// A decision was made.
    Decision,
    /// A constraint or requirement was stated.
    Constraint,
    /// An attempt failed.
    Failure,
    /// A goal or objective was stated.
    Goal,
}

impl fmt::Display for MarkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MarkerType::Decision => "decision",
            MarkerType::Constraint => "constraint",
            MarkerType::Failure => "failure",
            MarkerType::Goal => "goal",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MarkerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(MarkerType::Decision),
            "constraint" => Ok(MarkerType::Constraint),
            "failure" => Ok(MarkerType::Failure),
            "goal" => Ok(MarkerType::Goal),
            other => Err(format!("Unknown marker type: {other}")),
        }
    }
}

/// Where a recall candidate originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    /// A verbatim L0 turn.
    Turn,
    /// An episode-level summary (reserved; not currently emitted).
    Episode,
    /// An L2 fact.
    Fact,
}

impl fmt::Display for ContextSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContextSource::Turn => "turn",
            ContextSource::Episode => "episode",
            ContextSource::Fact => "fact",
        };
        write!(f, "{s}")
    }
}

/// The four consolidation actions a `ConsolidatingReflector` may return for
/// a scoped prior fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationActionType {
    /// Leave the fact as-is.
    Keep,
    /// Replace the fact with a new one, superseding it.
    Update,
    /// Persist a brand-new fact.
    Add,
    /// Retire the fact without replacement.
    Remove,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_display_and_from_str() {
        for role in [Role::User, Role::Assistant, Role::Tool] {
            let parsed: Role = role.to_string().parse().unwrap();
            assert_eq!(parsed, role);
        }
    }

    #[test]
    fn role_from_str_is_case_insensitive() {
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Tool".parse::<Role>().unwrap(), Role::Tool);
    }

    #[test]
    fn role_from_str_rejects_unknown() {
        assert!("narrator".parse::<Role>().is_err());
    }

    #[test]
    fn marker_type_round_trips() {
        for m in [
            MarkerType::Decision,
            MarkerType::Constraint,
            MarkerType::Failure,
            MarkerType::Goal,
        ] {
            let parsed: MarkerType = m.to_string().parse().unwrap();
            assert_eq!(parsed, m);
        }
    }
}
