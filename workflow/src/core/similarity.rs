//! Token-overlap similarity used to compare critique feedback.

use std::collections::HashSet;

/// Jaccard index over lowercase word tokens.
///
/// Punctuation is ignored. Two texts with no tokens are identical (1.0); one
/// empty side against a non-empty side shares nothing (0.0).
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}
