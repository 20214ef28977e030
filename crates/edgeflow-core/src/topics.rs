//! Topic pattern matching for pipeline selection.
//!
//! Patterns use `/` as the level separator and `#` as the wildcard:
//! a bare `#` matches everything, `#` at an inner level matches exactly
//! one level, and `#` as the final level matches one or more trailing
//! levels.

/// Check whether an incoming topic matches a pipeline topic pattern.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "#" {
        return true;
    }

    let pattern_levels: Vec<&str> = pattern.split('/').collect();
    let topic_levels: Vec<&str> = topic.split('/').collect();

    // A pattern with more levels than the topic can never match.
    if pattern_levels.len() > topic_levels.len() {
        return false;
    }

    for (i, level) in pattern_levels.iter().enumerate() {
        let last = i == pattern_levels.len() - 1;
        if *level == "#" {
            if last {
                // Trailing wildcard consumes the rest (one or more levels).
                return true;
            }
            // Inner wildcard matches exactly one level.
            continue;
        }
        if *level != topic_levels[i] {
            return false;
        }
    }

    // No trailing wildcard: the level counts must agree exactly.
    pattern_levels.len() == topic_levels.len()
}
