//! Non-convergence detection over a rolling window of verdicts.

use crate::core::similarity::token_overlap;
use crate::core::types::Verdict;

pub const DEFAULT_WINDOW: usize = 3;
pub const DEFAULT_THRESHOLD: f64 = 0.9;

/// Flags a loop whose critiques keep repeating the same blocking issues.
///
/// The window includes the newest verdict: with `window = 3` the newest
/// verdict plus the two before it must all be rejections whose blocking
/// issues are pairwise at least `threshold` similar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagnationDetector {
    window: usize,
    threshold: f64,
}

impl Default for StagnationDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_THRESHOLD)
    }
}

impl StagnationDetector {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self {
            window: window.max(2),
            threshold,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// `history` holds prior verdicts oldest first, excluding `newest`.
    pub fn is_stagnant(&self, history: &[Verdict], newest: &Verdict) -> bool {
        let prior_needed = self.window - 1;
        if newest.approved || history.len() < prior_needed {
            return false;
        }
        let prior = &history[history.len() - prior_needed..];
        if prior.iter().any(|verdict| verdict.approved) {
            return false;
        }

        let mut texts: Vec<String> = prior.iter().map(Verdict::blocking_text).collect();
        texts.push(newest.blocking_text());

        for (i, left) in texts.iter().enumerate() {
            for right in &texts[i + 1..] {
                if token_overlap(left, right) < self.threshold {
                    return false;
                }
            }
        }
        true
    }
}
