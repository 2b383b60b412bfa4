//! Jaccard similarity over tokenized question text (spec §4.3).
//!
//! Chosen because it provably satisfies the properties the spec requires of
//! `findSimilar`'s score: symmetric, non-negative, identical inputs score
//! 1.0 strictly above any distinct pair, and permutation-invariant (it is
//! set-based, so token order never matters).

use std::collections::HashSet;

/// Lowercase, strip punctuation, split on whitespace, dedupe.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(|s| s.to_string())
        .collect()
}

/// Jaccard similarity of two token sets: `|A ∩ B| / |A ∪ B|`, defined as
/// `1.0` when both sets are empty (two blank questions are identical).
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_questions_score_one() {
        let a = tokenize("Book me a flight to Tokyo!");
        let b = tokenize("book me a flight to tokyo");
        assert_eq!(jaccard(&a, &b), 1.0);
    }

    #[test]
    fn is_symmetric() {
        let a = tokenize("flights to paris");
        let b = tokenize("hotels in paris");
        assert_eq!(jaccard(&a, &b), jaccard(&b, &a));
    }

    #[test]
    fn is_non_negative_and_bounded() {
        let a = tokenize("completely different query");
        let b = tokenize("another unrelated sentence");
        let score = jaccard(&a, &b);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn permutation_invariant() {
        let a = tokenize("book a flight to tokyo");
        let b = tokenize("tokyo to flight a book");
        assert_eq!(jaccard(&a, &b), 1.0);
    }

    #[test]
    fn distinct_questions_score_below_identical() {
        let question = tokenize("book a flight to tokyo");
        let similar = tokenize("book a flight to osaka");
        let identical = tokenize("book a flight to tokyo");
        assert!(jaccard(&question, &similar) < jaccard(&question, &identical));
    }
}
