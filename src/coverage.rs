//! Keyword extraction and the coverage check the consolidation path uses
//! to warn when a scoped prior fact appears to have been dropped silently
//! by the reflector rather than explicitly kept, updated, or removed.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had",
    "was", "has", "this", "that", "with", "from", "will", "would", "should",
    "could", "into", "onto", "than", "then", "when", "what", "which", "who",
    "its", "our", "your", "their", "his", "her", "them", "they", "have",
];

/// Lowercase, strip punctuation, drop stop words and tokens shorter than
/// three characters.
#[must_use]
pub fn extract_keywords(text: &str) -> HashSet<String> {
    let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 3 && !stop_words.contains(word))
        .map(str::to_string)
        .collect()
}

/// Whether `fact_keywords` overlaps `action_keywords` by at least 50%,
/// measured against the fact's own keyword count. A fact with no
/// extractable keywords trivially passes.
#[must_use]
pub fn has_sufficient_overlap(fact_keywords: &HashSet<String>, action_keywords: &HashSet<String>) -> bool {
    if fact_keywords.is_empty() {
        return true;
    }
    let overlap = fact_keywords.intersection(action_keywords).count();
    (overlap as f64) / (fact_keywords.len() as f64) >= 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_lowercase_keywords_dropping_stop_words_and_short_tokens() {
        let keywords = extract_keywords("The Module A uses PostgreSQL, and it is fast.");
        assert!(keywords.contains("module"));
        assert!(keywords.contains("postgresql"));
        assert!(keywords.contains("fast"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("is"));
        assert!(!keywords.contains("it"));
    }

    #[test]
    fn overlap_of_half_or_more_passes() {
        let fact = extract_keywords("module uses postgresql database");
        let actions = extract_keywords("module now uses mysql");
        assert!(has_sufficient_overlap(&fact, &actions));
    }

    #[test]
    fn overlap_below_half_fails() {
        let fact = extract_keywords("module uses postgresql database engine");
        let actions = extract_keywords("completely unrelated content here");
        assert!(!has_sufficient_overlap(&fact, &actions));
    }

    #[test]
    fn empty_fact_keywords_trivially_pass() {
        assert!(has_sufficient_overlap(&HashSet::new(), &HashSet::new()));
    }
}
