//! Topic filters and routing keys.
//!
//! A topic is a `/`-separated sequence of words. Filters (subscription side)
//! may carry the wildcards `+` (one word) and `#` (rest of the key, last word
//! only); routing keys (publication side) never do. Adjacent slashes produce
//! empty words, which are ordinary words for matching purposes.

use smallvec::SmallVec;

/// Single-level wildcard word.
pub const SINGLE_WILDCARD: &str = "+";
/// Multi-level wildcard word.
pub const MULTI_WILDCARD: &str = "#";

/// Split a topic into its words without allocating for typical depths.
pub fn words(topic: &str) -> SmallVec<[&str; 8]> {
    topic.split('/').collect()
}

/// Validate a routing key (used on publish).
///
/// Routing keys must not contain wildcards or the null character. Empty words
/// (and the empty key) are permitted; they match as ordinary words.
pub fn validate_routing_key(key: &str) -> Result<(), &'static str> {
    if key.len() > 65535 {
        return Err("routing key exceeds maximum length");
    }
    if key.contains('\0') {
        return Err("routing key cannot contain null character");
    }
    if key.contains('+') || key.contains('#') {
        return Err("routing key cannot contain wildcards");
    }
    Ok(())
}

/// Validate a topic filter (used on subscribe/unsubscribe).
///
/// - `#` must occupy an entire word and be the last word
/// - `+` must occupy an entire word
pub fn validate_filter(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("topic filter cannot be empty");
    }
    if filter.len() > 65535 {
        return Err("topic filter exceeds maximum length");
    }
    if filter.contains('\0') {
        return Err("topic filter cannot contain null character");
    }

    let parts = words(filter);
    for (i, word) in parts.iter().enumerate() {
        if word.contains('#') {
            if *word != MULTI_WILDCARD {
                return Err("multi-level wildcard must occupy entire word");
            }
            if i != parts.len() - 1 {
                return Err("multi-level wildcard must be the last word");
            }
        }
        if word.contains('+') && *word != SINGLE_WILDCARD {
            return Err("single-level wildcard must occupy entire word");
        }
    }

    Ok(())
}

/// Check whether a filter matches a routing key, word by word.
///
/// The trie is the authoritative index for subscription matching; this linear
/// check serves the retained-message scan, where keys are iterated rather
/// than walked.
pub fn filter_matches_key(filter: &str, key: &str) -> bool {
    // the empty key matches only `#` and the exact empty filter, never `+`
    if key.is_empty() {
        return filter == MULTI_WILDCARD || filter.is_empty();
    }

    let filter_words = words(filter);
    let key_words = words(key);

    let mut ki = 0;
    for (fi, word) in filter_words.iter().enumerate() {
        if *word == MULTI_WILDCARD {
            // consumes the remainder, including zero words
            return fi == filter_words.len() - 1;
        }
        if ki >= key_words.len() {
            return false;
        }
        if *word != SINGLE_WILDCARD && *word != key_words[ki] {
            return false;
        }
        ki += 1;
    }

    ki == key_words.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_empty_segments() {
        assert_eq!(words("a//b").as_slice(), &["a", "", "b"]);
        assert_eq!(words("").as_slice(), &[""]);
        assert_eq!(words("/a/").as_slice(), &["", "a", ""]);
    }

    #[test]
    fn test_validate_routing_key() {
        assert!(validate_routing_key("a/b/c").is_ok());
        assert!(validate_routing_key("a//b").is_ok());
        assert!(validate_routing_key("").is_ok());

        assert!(validate_routing_key("a/+/c").is_err());
        assert!(validate_routing_key("a/#").is_err());
        assert!(validate_routing_key("a\0b").is_err());
    }

    #[test]
    fn test_validate_filter() {
        assert!(validate_filter("a").is_ok());
        assert!(validate_filter("a/b").is_ok());
        assert!(validate_filter("+").is_ok());
        assert!(validate_filter("#").is_ok());
        assert!(validate_filter("a/+/c").is_ok());
        assert!(validate_filter("a/#").is_ok());
        assert!(validate_filter("a//b").is_ok());

        assert!(validate_filter("").is_err());
        assert!(validate_filter("a+").is_err());
        assert!(validate_filter("a#").is_err());
        assert!(validate_filter("a/#/b").is_err());
        assert!(validate_filter("#/a").is_err());
    }

    #[test]
    fn test_filter_matches_key() {
        assert!(filter_matches_key("a/b", "a/b"));
        assert!(!filter_matches_key("a/b", "a"));
        assert!(!filter_matches_key("a", "a/b"));

        assert!(filter_matches_key("a/+/c", "a/b/c"));
        assert!(filter_matches_key("+/+", "a/b"));
        assert!(!filter_matches_key("a/+", "a/b/c"));
        // + does not cross word boundaries
        assert!(!filter_matches_key("+", "a/b"));

        assert!(filter_matches_key("#", "a/b/c"));
        assert!(filter_matches_key("a/#", "a"));
        assert!(filter_matches_key("a/#", "a/b/c"));
        assert!(!filter_matches_key("b/#", "a"));

        // empty words are ordinary words
        assert!(filter_matches_key("a/+/b", "a//b"));
        assert!(filter_matches_key("a//b", "a//b"));

        // the empty key matches only '#' and the exact empty filter
        assert!(filter_matches_key("#", ""));
        assert!(filter_matches_key("", ""));
        assert!(!filter_matches_key("+", ""));
    }
}
