//! Bounded, order-preserving interaction history for one session.
//!
//! Every external call reads its context from the [`EventLog`] and every
//! response is appended to it. The log is the only mutable state shared
//! between loop steps; all mutation goes through `append` and
//! `maybe_compact`, which enforce the ordering and size invariants:
//!
//! - Compaction only removes or merges a contiguous prefix.
//! - Surviving events keep their relative order.
//! - Sequence ids stay strictly increasing and are never handed out twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::WorkflowError;

pub const SUMMARY_AUTHOR: &str = "summarizer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Produce,
    Critique,
    Evaluation,
    Reflection,
    Summary,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Produce => "produce",
            EventKind::Critique => "critique",
            EventKind::Evaluation => "evaluation",
            EventKind::Reflection => "reflection",
            EventKind::Summary => "summary",
            EventKind::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub kind: EventKind,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub size_bytes: usize,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Event {
    fn new(
        seq: u64,
        author: impl Into<String>,
        kind: EventKind,
        payload: impl Into<String>,
        metadata: Option<Value>,
    ) -> Self {
        let mut event = Self {
            seq,
            timestamp: Utc::now(),
            author: author.into(),
            kind,
            payload: payload.into(),
            metadata,
            size_bytes: 0,
            truncated: false,
        };
        event.size_bytes = event.measure();
        event
    }

    fn measure(&self) -> usize {
        let metadata = self.metadata.as_ref().map_or(0, |m| m.to_string().len());
        self.payload.len() + metadata
    }

    /// Cut the payload to `cap` bytes (on a char boundary) and append a marker.
    fn truncate_payload(&mut self, cap: usize) {
        let mut cut = cap.min(self.payload.len());
        while !self.payload.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = self.payload.len() - cut;
        self.payload.truncate(cut);
        self.payload
            .push_str(&format!("\n[truncated {} bytes]", dropped));
        self.truncated = true;
        self.size_bytes = self.measure();
    }
}

/// Compaction thresholds. Counts are events, sizes are bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub threshold: usize,
    pub retain_recent: usize,
    pub payload_size_cap: usize,
    pub hard_event_cap: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            retain_recent: 10,
            payload_size_cap: 5 * 1024,
            hard_event_cap: 800,
        }
    }
}

/// Running totals across every compaction pass of one log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub passes: usize,
    pub summarized_events: usize,
    pub fallbacks: usize,
    pub dropped_events: usize,
    pub truncated_payloads: usize,
}

/// External call compressing a contiguous range of events into one text.
pub trait Summarizer {
    fn summarize(&self, events: &[Event]) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct EventLog {
    events: Vec<Event>,
    next_seq: u64,
    version: u64,
    config: CompactionConfig,
    stats: CompactionStats,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(CompactionConfig::default())
    }
}

impl EventLog {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            events: Vec::new(),
            next_seq: 1,
            version: 0,
            config,
            stats: CompactionStats::default(),
        }
    }

    pub fn append(
        &mut self,
        author: impl Into<String>,
        kind: EventKind,
        payload: impl Into<String>,
    ) -> u64 {
        self.append_with_metadata(author, kind, payload, None)
    }

    pub fn append_with_metadata(
        &mut self,
        author: impl Into<String>,
        kind: EventKind,
        payload: impl Into<String>,
        metadata: Option<Value>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let event = Event::new(seq, author, kind, payload, metadata);
        debug!(seq, kind = kind.as_str(), size = event.size_bytes, "event appended");
        self.events.push(event);
        self.version += 1;
        seq
    }

    /// Ordered events for context construction.
    pub fn view(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    pub fn stats(&self) -> CompactionStats {
        self.stats
    }

    /// Compact the log when it has grown past the threshold or the hard cap.
    ///
    /// Returns `true` when a pass ran. Summarization failures fall back to
    /// dropping the prefix and are logged, never returned. Once `cancel` has
    /// fired the prefix is left alone, so a stopped session keeps its history.
    pub fn maybe_compact<S>(&mut self, summarizer: &S, cancel: &CancelToken) -> bool
    where
        S: Summarizer + ?Sized,
    {
        let len = self.events.len();
        if len <= self.config.threshold && len <= self.config.hard_event_cap {
            return false;
        }

        let split = len.saturating_sub(self.config.retain_recent);
        if split > 0 && !cancel.is_cancelled() {
            self.compact_prefix(split, summarizer, cancel);
        }

        let cap = self.config.payload_size_cap;
        for event in &mut self.events {
            if event.kind != EventKind::Summary && !event.truncated && event.payload.len() > cap {
                event.truncate_payload(cap);
                self.stats.truncated_payloads += 1;
            }
        }

        if self.events.len() > self.config.hard_event_cap {
            let excess = self.events.len() - self.config.hard_event_cap;
            warn!(excess, cap = self.config.hard_event_cap, "dropping events over hard cap");
            self.events.drain(..excess);
            self.stats.dropped_events += excess;
        }

        self.stats.passes += 1;
        self.version += 1;
        true
    }

    fn compact_prefix<S>(&mut self, split: usize, summarizer: &S, cancel: &CancelToken)
    where
        S: Summarizer + ?Sized,
    {
        let prefix = &self.events[..split];
        let first_seq = prefix[0].seq;
        let last_seq = prefix[split - 1].seq;

        let summary = match summarizer.summarize(prefix) {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Err(_) if cancel.is_cancelled() => {
                debug!(first_seq, last_seq, "summary interrupted by cancellation, prefix kept");
                return;
            }
            Ok(_) => {
                let err = WorkflowError::CompactionFailure("summarizer returned no text".into());
                warn!(error = %err, first_seq, last_seq, "dropping prefix without summary");
                None
            }
            Err(cause) => {
                let err = WorkflowError::CompactionFailure(format!("{cause:#}"));
                warn!(error = %err, first_seq, last_seq, "dropping prefix without summary");
                None
            }
        };

        let replacement = match summary {
            Some(text) => {
                self.stats.summarized_events += split;
                // The summary takes the newest covered seq so ids stay ordered.
                let metadata = json!({
                    "covers": { "first_seq": first_seq, "last_seq": last_seq, "count": split }
                });
                vec![Event::new(
                    last_seq,
                    SUMMARY_AUTHOR,
                    EventKind::Summary,
                    text,
                    Some(metadata),
                )]
            }
            None => {
                self.stats.fallbacks += 1;
                self.stats.dropped_events += split;
                Vec::new()
            }
        };

        debug!(first_seq, last_seq, count = split, "compacting event prefix");
        self.events.splice(..split, replacement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Fixed;

    impl Summarizer for Fixed {
        fn summarize(&self, events: &[Event]) -> anyhow::Result<String> {
            Ok(format!("summary of {} events", events.len()))
        }
    }

    struct Failing;

    impl Summarizer for Failing {
        fn summarize(&self, _events: &[Event]) -> anyhow::Result<String> {
            bail!("summarizer unavailable")
        }
    }

    fn filled(config: CompactionConfig, count: usize) -> EventLog {
        let mut log = EventLog::new(config);
        for i in 0..count {
            log.append("implementer", EventKind::Produce, format!("event {i}"));
        }
        log
    }

    fn seqs(log: &EventLog) -> Vec<u64> {
        log.view().iter().map(|e| e.seq).collect()
    }

    fn strictly_increasing(log: &EventLog) -> bool {
        log.view().windows(2).all(|w| w[0].seq < w[1].seq)
    }

    #[test]
    fn thirty_five_events_compact_to_eleven() {
        let mut log = filled(CompactionConfig::default(), 35);
        assert!(log.maybe_compact(&Fixed, &CancelToken::new()));

        assert_eq!(log.len(), 11);
        let summary = &log.view()[0];
        assert_eq!(summary.kind, EventKind::Summary);
        assert_eq!(summary.payload, "summary of 25 events");
        assert_eq!(summary.metadata.as_ref().unwrap()["covers"]["count"], 25);

        let retained: Vec<&str> = log.view()[1..].iter().map(|e| e.payload.as_str()).collect();
        let expected: Vec<String> = (25..35).map(|i| format!("event {i}")).collect();
        assert_eq!(retained, expected);
        assert!(strictly_increasing(&log));
    }

    #[test]
    fn compaction_at_or_below_threshold_is_idempotent_noop() {
        let mut log = filled(CompactionConfig::default(), 30);
        let before = seqs(&log);
        let version = log.version();

        assert!(!log.maybe_compact(&Fixed, &CancelToken::new()));
        assert!(!log.maybe_compact(&Fixed, &CancelToken::new()));
        assert_eq!(seqs(&log), before);
        assert_eq!(log.version(), version);
        assert_eq!(log.stats().passes, 0);
    }

    #[test]
    fn compacted_log_is_stable_on_repeat() {
        let mut log = filled(CompactionConfig::default(), 35);
        log.maybe_compact(&Fixed, &CancelToken::new());
        let after_first = seqs(&log);
        assert!(!log.maybe_compact(&Fixed, &CancelToken::new()));
        assert_eq!(seqs(&log), after_first);
    }

    #[test]
    fn new_appends_never_reuse_ids() {
        let mut log = filled(CompactionConfig::default(), 35);
        log.maybe_compact(&Fixed, &CancelToken::new());
        let seq = log.append("reviewer", EventKind::Critique, "next");
        assert_eq!(seq, 36);
        assert!(strictly_increasing(&log));
    }

    #[test]
    fn summarizer_failure_drops_prefix() {
        let mut log = filled(CompactionConfig::default(), 35);
        assert!(log.maybe_compact(&Failing, &CancelToken::new()));

        assert_eq!(log.len(), 10);
        assert_eq!(log.view()[0].payload, "event 25");
        let stats = log.stats();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.dropped_events, 25);
    }

    #[test]
    fn oversized_payloads_are_truncated_but_summary_is_not() {
        struct Verbose;
        impl Summarizer for Verbose {
            fn summarize(&self, _events: &[Event]) -> anyhow::Result<String> {
                Ok("s".repeat(500))
            }
        }

        let config = CompactionConfig {
            threshold: 4,
            retain_recent: 2,
            payload_size_cap: 64,
            hard_event_cap: 100,
        };
        let mut log = filled(config, 4);
        log.append("implementer", EventKind::Produce, "x".repeat(200));
        log.maybe_compact(&Verbose, &CancelToken::new());

        let events = log.view();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].payload.len(), 500);
        assert!(!events[0].truncated);

        let big = &events[2];
        assert!(big.truncated);
        assert!(big.payload.starts_with(&"x".repeat(64)));
        assert!(big.payload.ends_with("[truncated 136 bytes]"));
        assert_eq!(big.size_bytes, big.payload.len());
        assert_eq!(log.stats().truncated_payloads, 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let config = CompactionConfig {
            threshold: 1,
            retain_recent: 1,
            payload_size_cap: 64,
            hard_event_cap: 100,
        };
        let mut log = filled(config, 1);
        log.append("implementer", EventKind::Produce, "é".repeat(100));
        log.maybe_compact(&Fixed, &CancelToken::new());
        let last = log.view().last().unwrap();
        assert!(last.truncated);
        assert!(last.payload.starts_with(&"é".repeat(32)));
    }

    #[test]
    fn hard_cap_drops_oldest_events() {
        let config = CompactionConfig {
            threshold: 5,
            retain_recent: 4,
            payload_size_cap: 1024,
            hard_event_cap: 3,
        };
        let mut log = filled(config, 6);
        log.maybe_compact(&Fixed, &CancelToken::new());

        assert_eq!(log.len(), 3);
        assert_eq!(seqs(&log), vec![4, 5, 6]);
        assert_eq!(log.stats().dropped_events, 2);
    }

    #[test]
    fn hard_cap_below_threshold_still_bounds_the_log() {
        let config = CompactionConfig {
            threshold: 30,
            retain_recent: 10,
            payload_size_cap: 5 * 1024,
            hard_event_cap: 20,
        };
        let mut log = filled(config, 25);

        assert!(log.maybe_compact(&Fixed, &CancelToken::new()));
        assert!(log.len() <= 20, "len {}", log.len());
        assert_eq!(log.view()[0].kind, EventKind::Summary);
        assert!(strictly_increasing(&log));
    }

    struct CancelsMidway<'a>(&'a CancelToken);

    impl Summarizer for CancelsMidway<'_> {
        fn summarize(&self, _events: &[Event]) -> anyhow::Result<String> {
            self.0.cancel();
            bail!("cancelled")
        }
    }

    #[test]
    fn cancelled_summary_keeps_the_prefix() {
        let cancel = CancelToken::new();
        let mut log = filled(CompactionConfig::default(), 35);

        log.maybe_compact(&CancelsMidway(&cancel), &cancel);

        assert_eq!(log.len(), 35);
        assert_eq!(log.stats().fallbacks, 0);
        assert_eq!(log.stats().dropped_events, 0);
        assert_eq!(seqs(&log)[0], 1);
    }

    #[test]
    fn cancelled_session_skips_summarization() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut log = filled(CompactionConfig::default(), 35);

        log.maybe_compact(&Failing, &cancel);

        assert_eq!(log.len(), 35);
        assert_eq!(log.stats().fallbacks, 0);
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let mut log = EventLog::default();
        log.append("reviewer", EventKind::Critique, "looks good");
        let value = serde_json::to_value(&log.view()[0]).unwrap();
        assert_eq!(value["kind"], "critique");
        assert_eq!(value["sizeBytes"], 10);
        assert_eq!(value["seq"], 1);
        assert!(value.get("truncated").is_none());
    }
}
