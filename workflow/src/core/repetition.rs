//! Degenerate-repetition guard for producer output.
//!
//! Generation calls occasionally get stuck emitting the same block over and
//! over. The guard looks at the trailing window of a response for a pattern
//! repeated back to back and cuts the response after its first occurrence.

use std::borrow::Cow;

use tracing::warn;

/// A periodic run found at the end of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repetition {
    /// Byte offset where the repeated run begins.
    pub start: usize,
    pub pattern_len: usize,
    pub repeats: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepetitionGuard {
    min_pattern: usize,
    max_pattern: usize,
    threshold: usize,
    window: usize,
}

impl Default for RepetitionGuard {
    fn default() -> Self {
        Self::new(200, 1000, 5, 5000)
    }
}

impl RepetitionGuard {
    pub fn new(min_pattern: usize, max_pattern: usize, threshold: usize, window: usize) -> Self {
        Self {
            min_pattern: min_pattern.max(1),
            max_pattern,
            threshold: threshold.max(2),
            window,
        }
    }

    /// Find the shortest pattern in `[min_pattern, max_pattern]` that repeats
    /// at least `threshold` times at the end of the trailing window.
    pub fn detect(&self, text: &str) -> Option<Repetition> {
        let bytes = text.as_bytes();
        let window_start = bytes.len().saturating_sub(self.window);
        let tail = &bytes[window_start..];
        let longest = self.max_pattern.min(tail.len() / self.threshold);

        for len in self.min_pattern..=longest {
            let span = len * self.threshold;
            let mut start = tail.len() - span;
            if !is_periodic(&tail[start..], len) {
                continue;
            }
            while start > 0 && tail[start - 1] == tail[start - 1 + len] {
                start -= 1;
            }
            return Some(Repetition {
                start: window_start + start,
                pattern_len: len,
                repeats: (tail.len() - start) / len,
            });
        }
        None
    }

    /// Cut `text` after the first occurrence of a trailing repeated pattern.
    pub fn collapse<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let Some(repetition) = self.detect(text) else {
            return Cow::Borrowed(text);
        };
        let mut cut = repetition.start + repetition.pattern_len;
        while !text.is_char_boundary(cut) {
            cut += 1;
        }
        let dropped = text.len() - cut;
        warn!(
            pattern_len = repetition.pattern_len,
            repeats = repetition.repeats,
            dropped,
            "collapsed repeated output"
        );
        Cow::Owned(format!(
            "{}\n[repetition truncated: {} repeats of a {}-byte pattern, {} bytes dropped]",
            &text[..cut],
            repetition.repeats,
            repetition.pattern_len,
            dropped
        ))
    }
}

fn is_periodic(run: &[u8], period: usize) -> bool {
    run.iter().zip(&run[period..]).all(|(a, b)| a == b)
}
