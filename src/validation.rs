//! Input validation. Every function here is pure and synchronous: it
//! either returns a cleaned-up value or a [`Error::Validation`], and never
//! touches storage — validation always runs before any state is mutated.

use crate::error::{Error, Result};
use crate::types::Role;

/// Trim and require a non-empty session id.
pub fn validate_session_id(session_id: &str) -> Result<String> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("session_id", "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Coerce a role string (case-insensitive) into a [`Role`].
pub fn validate_role(role: &str) -> Result<Role> {
    role.parse()
        .map_err(|_| Error::validation("role", format!("unknown role '{role}'")))
}

/// Trim, require non-empty, and enforce `max_content_length`.
pub fn validate_content(content: &str, max_content_length: usize) -> Result<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("content", "must not be empty"));
    }
    if trimmed.chars().count() > max_content_length {
        return Err(Error::validation(
            "content",
            format!("exceeds max_content_length of {max_content_length}"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Require each marker to be a known built-in or a `custom:<non-empty>`
/// string.
pub fn validate_markers(markers: &[String]) -> Result<()> {
    for marker in markers {
        if marker.parse::<crate::types::MarkerType>().is_ok() {
            continue;
        }
        if let Some(name) = marker.strip_prefix("custom:") {
            if !name.is_empty() {
                continue;
            }
        }
        return Err(Error::validation(
            "markers",
            format!("invalid marker '{marker}'"),
        ));
    }
    Ok(())
}

/// Require a positive token budget.
pub fn validate_token_budget(budget: usize) -> Result<usize> {
    if budget == 0 {
        return Err(Error::validation("token_budget", "must be positive"));
    }
    Ok(budget)
}

/// Require a relevance threshold in `[0, 1]`.
pub fn validate_relevance_threshold(threshold: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(Error::validation(
            "min_relevance",
            "must be in [0, 1]",
        ));
    }
    Ok(threshold)
}
