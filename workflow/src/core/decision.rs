//! Decision normalization: critique responses into structured verdicts.
//!
//! Rules, in priority order:
//! - An explicit termination signal approves, whatever the text says.
//! - A non-empty blocking-issues section rejects, listing its entries.
//! - An explicit verdict line (`Verdict: approved`) approves only when no
//!   blocking issue was listed.
//! - Any other recognized structure rejects with the parsed lists.
//! - Unstructured text rejects, carrying the whole text as one blocking issue.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::{CritiqueResponse, Feedback, TerminationSignal, Verdict};

const BLOCKING_LABELS: &[&str] = &[
    "blocking issues",
    "blocking issue",
    "blocking",
    "blockers",
    "critical issues",
    "required changes",
    "must fix",
];

const SUGGESTION_LABELS: &[&str] = &[
    "suggestions",
    "suggestion",
    "non blocking",
    "non blocking issues",
    "nonblocking",
    "nonblocking issues",
    "minor issues",
    "nice to have",
    "optional improvements",
    "recommendations",
];

const VERDICT_LABELS: &[&str] = &["verdict", "decision"];

const APPROVE_WORDS: &[&str] = &["approved", "approve", "accept", "accepted", "lgtm", "pass"];

const EMPTY_ENTRIES: &[&str] = &[
    "none",
    "n/a",
    "na",
    "nothing",
    "no issues",
    "no blocking issues",
    "no suggestions",
    "-",
];

static BULLET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[-*+\u{2022}]|\d+[.)])\s+(.*)$").expect("bullet regex is valid")
});

/// Normalize a critique into a verdict. Pure function of its inputs.
pub fn normalize(text: &str, signal: Option<TerminationSignal>) -> Verdict {
    let parsed = parse_sections(text);

    if signal.is_some() {
        return Verdict {
            approved: true,
            blocking_issues: parsed.blocking,
            suggestions: parsed.suggestions,
            raw_text: text.to_string(),
        };
    }

    if !parsed.blocking.is_empty() {
        return Verdict {
            approved: false,
            blocking_issues: parsed.blocking,
            suggestions: parsed.suggestions,
            raw_text: text.to_string(),
        };
    }

    if parsed.recognized {
        return Verdict {
            approved: parsed.approval_line,
            blocking_issues: Vec::new(),
            suggestions: parsed.suggestions,
            raw_text: text.to_string(),
        };
    }

    let issue = if text.trim().is_empty() {
        "critique response was empty".to_string()
    } else {
        text.to_string()
    };
    Verdict {
        approved: false,
        blocking_issues: vec![issue],
        suggestions: Vec::new(),
        raw_text: text.to_string(),
    }
}

/// Build a verdict from the tagged result type, bypassing text heuristics.
pub fn from_feedback(feedback: Feedback) -> Verdict {
    match feedback {
        Feedback::Approve => Verdict {
            approved: true,
            blocking_issues: Vec::new(),
            suggestions: Vec::new(),
            raw_text: "approved".to_string(),
        },
        Feedback::Reject {
            blocking_issues,
            suggestions,
        } => {
            let mut verdict = Verdict {
                approved: false,
                blocking_issues,
                suggestions,
                raw_text: String::new(),
            };
            verdict.raw_text = verdict.render_feedback();
            verdict
        }
    }
}

impl CritiqueResponse {
    pub fn into_verdict(self) -> Verdict {
        match self {
            CritiqueResponse::Structured(feedback) => from_feedback(feedback),
            CritiqueResponse::Text { text, signal } => normalize(&text, signal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Blocking,
    Suggestions,
    Other,
}

#[derive(Debug, Default)]
struct ParsedCritique {
    blocking: Vec<String>,
    suggestions: Vec<String>,
    /// True once any blocking/suggestion heading or verdict line was seen.
    recognized: bool,
    approval_line: bool,
}

fn parse_sections(text: &str) -> ParsedCritique {
    let mut parsed = ParsedCritique::default();
    let mut current: Option<Section> = None;

    for line in text.lines() {
        if let Some(heading) = parse_heading(line) {
            match heading {
                Heading::Section(section, inline) => {
                    if section != Section::Other {
                        parsed.recognized = true;
                    }
                    current = Some(section);
                    if !inline.is_empty() {
                        push_entry(&mut parsed, section, &inline, false);
                    }
                }
                Heading::Verdict { approve } => {
                    parsed.recognized = true;
                    parsed.approval_line = approve;
                    current = None;
                }
            }
            continue;
        }

        let Some(section) = current else {
            continue;
        };
        if line.trim().is_empty() {
            continue;
        }
        match BULLET_RE.captures(line).and_then(|caps| caps.get(1)) {
            Some(item) => push_entry(&mut parsed, section, item.as_str(), false),
            None => push_entry(&mut parsed, section, line.trim(), true),
        }
    }

    parsed
}

fn push_entry(parsed: &mut ParsedCritique, section: Section, entry: &str, continuation: bool) {
    let entry = entry.trim();
    if is_empty_entry(entry) {
        return;
    }
    let list = match section {
        Section::Blocking => &mut parsed.blocking,
        Section::Suggestions => &mut parsed.suggestions,
        Section::Other => return,
    };
    match list.last_mut() {
        Some(last) if continuation => {
            last.push(' ');
            last.push_str(entry);
        }
        _ => list.push(entry.to_string()),
    }
}

fn is_empty_entry(entry: &str) -> bool {
    let normalized = entry
        .trim()
        .trim_end_matches('.')
        .trim_matches(['*', '_'])
        .to_ascii_lowercase();
    normalized.is_empty() || EMPTY_ENTRIES.contains(&normalized.as_str())
}

enum Heading {
    Section(Section, String),
    Verdict { approve: bool },
}

fn parse_heading(line: &str) -> Option<Heading> {
    let trimmed = line.trim();
    if trimmed.is_empty() || BULLET_RE.is_match(trimmed) {
        return None;
    }
    let hashed = trimmed.starts_with('#');
    let body = trimmed.trim_start_matches('#').trim();
    let bolded = body.starts_with("**") || body.starts_with("__");
    let body = body.trim_start_matches(['*', '_']).trim();

    let (label, rest, has_colon) = match body.find(':') {
        Some(idx) => (&body[..idx], &body[idx + 1..], true),
        None => (body, "", false),
    };
    let label = normalize_label(label);
    let rest = rest.trim().trim_matches(['*', '_']).trim();

    if has_colon && VERDICT_LABELS.contains(&label.as_str()) {
        let word = rest
            .trim_end_matches('.')
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        return Some(Heading::Verdict {
            approve: APPROVE_WORDS.contains(&word.as_str()),
        });
    }

    let known = if BLOCKING_LABELS.contains(&label.as_str()) {
        Some(Section::Blocking)
    } else if SUGGESTION_LABELS.contains(&label.as_str()) {
        Some(Section::Suggestions)
    } else {
        None
    };

    match known {
        Some(section) if hashed || bolded || has_colon || rest.is_empty() => {
            Some(Heading::Section(section, rest.to_string()))
        }
        // Unknown headings close the current section.
        None if hashed || (bolded && body.ends_with(['*', '_'])) => {
            Some(Heading::Section(Section::Other, String::new()))
        }
        _ => None,
    }
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_end_matches(['*', '_'])
        .to_ascii_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_approves_regardless_of_text() {
        let text = "## Blocking issues\n- tests are failing\n- output file missing\n";
        let verdict = normalize(text, Some(TerminationSignal));
        assert!(verdict.approved);
        assert_eq!(verdict.raw_text, text);
    }

    #[test]
    fn signal_approves_empty_text() {
        let verdict = normalize("", Some(TerminationSignal));
        assert!(verdict.approved);
    }

    #[test]
    fn blocking_section_rejects_with_entries() {
        let text = "Review complete.\n\n\
                    ## Blocking Issues\n\
                    - missing null handling\n\
                    - plot axis unlabeled\n\n\
                    ## Suggestions\n\
                    1. rename variables\n";
        let verdict = normalize(text, None);
        assert!(!verdict.approved);
        assert_eq!(
            verdict.blocking_issues,
            vec!["missing null handling", "plot axis unlabeled"]
        );
        assert_eq!(verdict.suggestions, vec!["rename variables"]);
    }

    #[test]
    fn bold_and_colon_headings_are_recognized() {
        let text = "**Blocking issues:** results table is empty\n\
                    **Non-blocking:**\n\
                    * add a docstring\n";
        let verdict = normalize(text, None);
        assert!(!verdict.approved);
        assert_eq!(verdict.blocking_issues, vec!["results table is empty"]);
        assert_eq!(verdict.suggestions, vec!["add a docstring"]);
    }

    #[test]
    fn continuation_lines_join_previous_entry() {
        let text = "Blocking issues:\n- the loader drops rows\n  when the header repeats\n";
        let verdict = normalize(text, None);
        assert_eq!(
            verdict.blocking_issues,
            vec!["the loader drops rows when the header repeats"]
        );
    }

    #[test]
    fn unknown_heading_closes_section() {
        let text = "## Blocking issues\n- one\n## Notes\n- not an issue\n";
        let verdict = normalize(text, None);
        assert_eq!(verdict.blocking_issues, vec!["one"]);
    }

    #[test]
    fn unstructured_text_defaults_to_rejection() {
        let text = "Looks mostly fine to me, great work overall!";
        let verdict = normalize(text, None);
        assert!(!verdict.approved);
        assert_eq!(verdict.blocking_issues, vec![text.to_string()]);
        assert_eq!(verdict.raw_text, text);
    }

    #[test]
    fn empty_blocking_section_without_verdict_line_still_rejects() {
        let text = "Blocking issues: none\nSuggestions:\n- tidy imports\n";
        let verdict = normalize(text, None);
        assert!(!verdict.approved);
        assert!(verdict.blocking_issues.is_empty());
        assert_eq!(verdict.suggestions, vec!["tidy imports"]);
    }

    #[test]
    fn verdict_line_approves_when_nothing_blocks() {
        let text = "Blocking issues: none.\nVerdict: APPROVED\n";
        let verdict = normalize(text, None);
        assert!(verdict.approved);
    }

    #[test]
    fn verdict_line_cannot_override_blocking_entries() {
        let text = "Verdict: approved\nBlocking issues:\n- crash on empty input\n";
        let verdict = normalize(text, None);
        assert!(!verdict.approved);
        assert_eq!(verdict.blocking_issues, vec!["crash on empty input"]);
    }

    #[test]
    fn empty_text_without_signal_rejects() {
        let verdict = normalize("   ", None);
        assert!(!verdict.approved);
        assert_eq!(verdict.blocking_issues, vec!["critique response was empty"]);
    }

    #[test]
    fn structured_feedback_bypasses_text_rules() {
        let verdict = CritiqueResponse::Structured(Feedback::Reject {
            blocking_issues: vec!["no tests".to_string()],
            suggestions: Vec::new(),
        })
        .into_verdict();
        assert!(!verdict.approved);
        assert!(verdict.raw_text.contains("no tests"));

        let verdict = CritiqueResponse::Structured(Feedback::Approve).into_verdict();
        assert!(verdict.approved);
    }
}
