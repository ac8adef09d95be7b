//! Pattern-based marker detection and marker-boost scoring.
//!
//! A marker is either one of the four built-ins (`decision`, `constraint`,
//! `failure`, `goal`) or an arbitrary `custom:<name>` string. Detection only
//! ever produces built-ins; custom markers can only arrive explicitly from
//! the caller.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::MemoryConfig;
use crate::types::MarkerType;

const DECISION_VOCAB: &str = "decision|decided|choosing|selected|chose|picked|going with";
const CONSTRAINT_VOCAB: &str =
    "constraint|requirement|must|cannot|can't|won't|budget|limit|restriction";
const FAILURE_VOCAB: &str = "failed|error|didn't work|didn't succeed|tried but|couldn't|could not";
const GOAL_VOCAB: &str = "goal|objective|task|need to|want to|trying to|aim";

fn marker_regex(marker: MarkerType) -> &'static Regex {
    static DECISION: OnceLock<Regex> = OnceLock::new();
    static CONSTRAINT: OnceLock<Regex> = OnceLock::new();
    static FAILURE: OnceLock<Regex> = OnceLock::new();
    static GOAL: OnceLock<Regex> = OnceLock::new();

    let (cell, vocab) = match marker {
        MarkerType::Decision => (&DECISION, DECISION_VOCAB),
        MarkerType::Constraint => (&CONSTRAINT, CONSTRAINT_VOCAB),
        MarkerType::Failure => (&FAILURE, FAILURE_VOCAB),
        MarkerType::Goal => (&GOAL, GOAL_VOCAB),
    };

    cell.get_or_init(|| {
        // `^` under multiline mode matches both start-of-content and the
        // position right after a newline, which is exactly the two anchor
        // points the detection rule calls for.
        let pattern = format!(r"(?mi)^[ \t]*(?:{vocab})\s*:");
        Regex::new(&pattern).expect("marker regex is a compile-time constant")
    })
}

const BUILTIN_MARKERS: [MarkerType; 4] = [
    MarkerType::Decision,
    MarkerType::Constraint,
    MarkerType::Failure,
    MarkerType::Goal,
];

/// Detect built-in markers in `content`, ordered by where each marker's
/// keyword first appears.
#[must_use]
pub fn detect_markers(content: &str) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();
    for marker in BUILTIN_MARKERS {
        if let Some(m) = marker_regex(marker).find(content) {
            hits.push((m.start(), marker.to_string()));
        }
    }
    hits.sort_by_key(|(pos, _)| *pos);
    hits.into_iter().map(|(_, name)| name).collect()
}

/// Merge explicit and auto-detected markers per the "explicit overrides
/// detected" rule: if `explicit` is non-empty, it wins verbatim
/// (deduplicated, order-preserving); otherwise fall back to detection when
/// `auto_detect` is enabled.
#[must_use]
pub fn resolve_markers(content: &str, explicit: Option<&[String]>, auto_detect: bool) -> Vec<String> {
    if let Some(markers) = explicit {
        return dedup_preserve_order(markers);
    }
    if auto_detect {
        return detect_markers(content);
    }
    Vec::new()
}

fn dedup_preserve_order(markers: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(markers.len());
    for marker in markers {
        if seen.insert(marker.clone()) {
            out.push(marker.clone());
        }
    }
    out
}

/// Sum of configured weights over `markers`.
#[must_use]
pub fn marker_boost(markers: &[String], config: &MemoryConfig) -> f32 {
    markers.iter().map(|m| config.marker_weight(m)).sum()
}
