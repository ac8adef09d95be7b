//! Configuration surface. `MemoryConfig` composes three frozen sub-configs
//! plus a handful of top-level knobs; everything is validated once, at
//! construction, rather than checked ad hoc at each call site.

use std::collections::HashMap;
use std::env;

use regex::Regex;
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::MarkerType;

/// Default marker → weight table, applied when `marker_weights` doesn't
/// override a given marker.
#[must_use]
pub fn default_marker_weights() -> HashMap<String, f32> {
    HashMap::from([
        ("constraint".to_string(), 0.4),
        ("decision".to_string(), 0.3),
        ("goal".to_string(), 0.3),
        ("failure".to_string(), 0.2),
    ])
}

/// Weight applied to any marker (built-in or `custom:*`) absent from
/// `marker_weights`.
pub const DEFAULT_CUSTOM_MARKER_WEIGHT: f32 = 0.2;

/// Episode boundary rules, evaluated in a fixed order by the episode
/// manager.
#[derive(Debug, Clone)]
pub struct EpisodeBoundaryConfig {
    /// Rule 1: close once the open episode reaches this many turns.
    pub max_turns: u32,
    /// Rule 2: close if the gap since the last turn exceeds this many
    /// seconds.
    pub max_time_gap_seconds: i64,
    /// Rule 3: close whenever a tool-role turn arrives.
    pub close_on_tool_result: bool,
    /// Rule 4: close if the turn content matches any of these regexes.
    pub close_on_patterns: Vec<String>,
}

impl Default for EpisodeBoundaryConfig {
    fn default() -> Self {
        Self {
            max_turns: 6,
            max_time_gap_seconds: 1800,
            close_on_tool_result: false,
            close_on_patterns: Vec::new(),
        }
    }
}

impl EpisodeBoundaryConfig {
    /// Whether `content` matches any configured closure pattern. Invalid
    /// regexes are treated as non-matching rather than raised, since this
    /// runs on the ingestion hot path.
    #[must_use]
    pub fn matches_close_pattern(&self, content: &str) -> bool {
        self.close_on_patterns.iter().any(|pattern| {
            Regex::new(pattern)
                .map(|re| re.is_match(content))
                .unwrap_or(false)
        })
    }

    fn validate(&self) -> Result<()> {
        if self.max_turns == 0 {
            return Err(Error::Configuration(
                "episode_boundary.max_turns must be positive".into(),
            ));
        }
        if self.max_time_gap_seconds <= 0 {
            return Err(Error::Configuration(
                "episode_boundary.max_time_gap_seconds must be positive".into(),
            ));
        }
        for pattern in &self.close_on_patterns {
            Regex::new(pattern).map_err(|e| {
                Error::Configuration(format!("invalid close_on_patterns regex '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}

/// Recall budget allocation knobs.
#[derive(Debug, Clone)]
pub struct RecallConfig {
    /// Token budget used when the caller doesn't supply one.
    pub default_token_budget: usize,
    /// Fraction of the budget reserved for the current episode.
    pub current_episode_budget_pct: f32,
    /// `k` passed to `vector_search`.
    pub max_vector_results: usize,
    /// Minimum relevance for a vector-search result to be kept.
    pub min_relevance_threshold: f32,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            default_token_budget: 4000,
            current_episode_budget_pct: 0.4,
            max_vector_results: 50,
            min_relevance_threshold: 0.0,
        }
    }
}

impl RecallConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.current_episode_budget_pct) {
            return Err(Error::Configuration(
                "recall.current_episode_budget_pct must be in [0, 1]".into(),
            ));
        }
        if self.max_vector_results == 0 {
            return Err(Error::Configuration(
                "recall.max_vector_results must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_relevance_threshold) {
            return Err(Error::Configuration(
                "recall.min_relevance_threshold must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

/// Reflection and consolidation knobs.
#[derive(Debug, Clone)]
pub struct ReflectionConfig {
    /// Whether reflection runs at all.
    pub enabled: bool,
    /// Minimum combined turn count before the carry-forward buffer is
    /// released into a reflection call.
    pub min_episode_turns: u32,
    /// Cap on facts persisted per legacy-path reflection call.
    pub max_facts_per_episode: usize,
    /// Facts (or actions) below this confidence are dropped.
    pub min_confidence: f32,
    /// Minimum cosine similarity for a prior fact to be scoped into a
    /// consolidation call.
    pub consolidation_similarity_threshold: f32,
    /// Minimum cosine similarity for an ADD candidate to be treated as a
    /// duplicate of an existing prior fact. `1.0` disables dedup.
    pub dedup_similarity_threshold: f32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_episode_turns: 2,
            max_facts_per_episode: 5,
            min_confidence: 0.7,
            consolidation_similarity_threshold: 0.6,
            dedup_similarity_threshold: 0.95,
        }
    }
}

impl ReflectionConfig {
    fn validate(&self) -> Result<()> {
        if self.min_episode_turns == 0 {
            return Err(Error::Configuration(
                "reflection.min_episode_turns must be positive".into(),
            ));
        }
        if self.max_facts_per_episode == 0 {
            return Err(Error::Configuration(
                "reflection.max_facts_per_episode must be positive".into(),
            ));
        }
        for (name, value) in [
            ("min_confidence", self.min_confidence),
            (
                "consolidation_similarity_threshold",
                self.consolidation_similarity_threshold,
            ),
            ("dedup_similarity_threshold", self.dedup_similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Configuration(format!(
                    "reflection.{name} must be in [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Top-level configuration for a `MemorySession`.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Whether to auto-detect markers when none are supplied explicitly.
    pub auto_detect_markers: bool,
    /// Marker → weight overrides. Markers absent here fall back to
    /// [`default_marker_weights`] or [`DEFAULT_CUSTOM_MARKER_WEIGHT`].
    pub marker_weights: HashMap<String, f32>,
    /// Episode boundary rules.
    pub episode_boundary: EpisodeBoundaryConfig,
    /// Recall budget allocation.
    pub recall: RecallConfig,
    /// Reflection and consolidation.
    pub reflection: ReflectionConfig,
    /// Turns longer than this (in characters, after trimming) are
    /// rejected by validation.
    pub max_content_length: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            auto_detect_markers: true,
            marker_weights: default_marker_weights(),
            episode_boundary: EpisodeBoundaryConfig::default(),
            recall: RecallConfig::default(),
            reflection: ReflectionConfig::default(),
            max_content_length: 100_000,
        }
    }
}

impl MemoryConfig {
    /// Validate every sub-config. Call after construction and after any
    /// `from_env` overlay.
    pub fn validate(&self) -> Result<()> {
        if self.max_content_length == 0 {
            return Err(Error::Configuration(
                "max_content_length must be positive".into(),
            ));
        }
        for (marker, weight) in &self.marker_weights {
            if *weight < 0.0 {
                return Err(Error::Configuration(format!(
                    "marker_weights['{marker}'] must be non-negative"
                )));
            }
        }
        self.episode_boundary.validate()?;
        self.recall.validate()?;
        self.reflection.validate()?;
        Ok(())
    }

    /// The weight for a given marker string, falling back to the default
    /// table, then to [`DEFAULT_CUSTOM_MARKER_WEIGHT`].
    #[must_use]
    pub fn marker_weight(&self, marker: &str) -> f32 {
        if let Some(weight) = self.marker_weights.get(marker) {
            return *weight;
        }
        if let Ok(builtin) = marker.parse::<MarkerType>() {
            if let Some(weight) = default_marker_weights().get(&builtin.to_string()) {
                return *weight;
            }
        }
        DEFAULT_CUSTOM_MARKER_WEIGHT
    }

    /// Build a config from defaults overlaid with `MEMORY_*` environment
    /// variables. Parse failures fall back to the existing value with a
    /// logged warning rather than aborting construction; call
    /// [`MemoryConfig::validate`] afterward.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("MEMORY_AUTO_DETECT_MARKERS") {
            match v.parse::<bool>() {
                Ok(parsed) => config.auto_detect_markers = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_AUTO_DETECT_MARKERS, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_MAX_TURNS") {
            match v.parse::<u32>() {
                Ok(parsed) => config.episode_boundary.max_turns = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_MAX_TURNS, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_MAX_TIME_GAP_SECONDS") {
            match v.parse::<i64>() {
                Ok(parsed) => config.episode_boundary.max_time_gap_seconds = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_MAX_TIME_GAP_SECONDS, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_CLOSE_ON_TOOL_RESULT") {
            match v.parse::<bool>() {
                Ok(parsed) => config.episode_boundary.close_on_tool_result = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_CLOSE_ON_TOOL_RESULT, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_DEFAULT_TOKEN_BUDGET") {
            match v.parse::<usize>() {
                Ok(parsed) => config.recall.default_token_budget = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_DEFAULT_TOKEN_BUDGET, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_CURRENT_EPISODE_BUDGET_PCT") {
            match v.parse::<f32>() {
                Ok(parsed) => config.recall.current_episode_budget_pct = parsed.clamp(0.0, 1.0),
                Err(_) => {
                    warn!(value = %v, "invalid MEMORY_CURRENT_EPISODE_BUDGET_PCT, keeping default");
                }
            }
        }
        if let Ok(v) = env::var("MEMORY_MAX_VECTOR_RESULTS") {
            match v.parse::<usize>() {
                Ok(parsed) => config.recall.max_vector_results = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_MAX_VECTOR_RESULTS, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_REFLECTION_ENABLED") {
            match v.parse::<bool>() {
                Ok(parsed) => config.reflection.enabled = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_REFLECTION_ENABLED, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_MIN_CONFIDENCE") {
            match v.parse::<f32>() {
                Ok(parsed) => config.reflection.min_confidence = parsed.clamp(0.0, 1.0),
                Err(_) => warn!(value = %v, "invalid MEMORY_MIN_CONFIDENCE, keeping default"),
            }
        }
        if let Ok(v) = env::var("MEMORY_MAX_CONTENT_LENGTH") {
            match v.parse::<usize>() {
                Ok(parsed) => config.max_content_length = parsed,
                Err(_) => warn!(value = %v, "invalid MEMORY_MAX_CONTENT_LENGTH, keeping default"),
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(MemoryConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_budget_pct() {
        let mut config = MemoryConfig::default();
        config.recall.current_episode_budget_pct = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_turns() {
        let mut config = MemoryConfig::default();
        config.episode_boundary.max_turns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn marker_weight_falls_back_through_overrides_defaults_and_custom() {
        let mut config = MemoryConfig::default();
        assert_eq!(config.marker_weight("constraint"), 0.4);
        assert_eq!(config.marker_weight("custom:foo"), DEFAULT_CUSTOM_MARKER_WEIGHT);

        config.marker_weights.insert("constraint".into(), 0.9);
        assert_eq!(config.marker_weight("constraint"), 0.9);
    }

    #[test]
    fn close_on_patterns_matches_case_sensitively() {
        let mut config = EpisodeBoundaryConfig::default();
        config.close_on_patterns.push("STOP".to_string());
        assert!(config.matches_close_pattern("please STOP now"));
        assert!(!config.matches_close_pattern("please stop now"));
    }
}
