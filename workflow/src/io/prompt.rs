//! Prompt builder for generation calls.
//!
//! Each role has a minijinja template whose sections are delimited by
//! `<!-- section:KEY required|droppable -->` markers. After rendering, the
//! builder drops droppable sections until the prompt fits its byte budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::collaborators::StageEvidence;
use crate::core::types::Role;
use crate::events::Event;
use crate::plan::Stage;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const PLAN_REVIEWER_TEMPLATE: &str = include_str!("prompts/plan_reviewer.md");
const IMPLEMENTER_TEMPLATE: &str = include_str!("prompts/implementer.md");
const REVIEWER_TEMPLATE: &str = include_str!("prompts/reviewer.md");
const CRITERIA_CHECKER_TEMPLATE: &str = include_str!("prompts/criteria_checker.md");
const REFLECTOR_TEMPLATE: &str = include_str!("prompts/reflector.md");
const SUMMARIZER_TEMPLATE: &str = include_str!("prompts/summarizer.md");
const REPORTER_TEMPLATE: &str = include_str!("prompts/reporter.md");

/// Droppable sections, least important first.
const DROP_ORDER: &[&str] = &["history", "evidence", "previous", "suggestions", "remaining"];

const TRUNCATION_MARKER: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex is valid")
});

/// Everything a template may reference. Unset fields render as absent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PromptInputs {
    pub goal: String,
    pub iteration: u32,
    pub stage: Option<String>,
    pub artifact: Option<String>,
    pub feedback: Option<String>,
    pub previous: Option<String>,
    pub evidence: Option<String>,
    pub remaining: Option<String>,
    pub history: Option<String>,
}

impl PromptInputs {
    pub fn new(goal: &str) -> Self {
        Self {
            goal: goal.trim().to_string(),
            ..Self::default()
        }
    }

    pub fn with_stage(mut self, stage: &Stage) -> Self {
        self.stage = non_empty(stage.render());
        self
    }

    pub fn with_artifact(mut self, artifact: &str) -> Self {
        self.artifact = non_empty(artifact.to_string());
        self
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback.and_then(non_empty);
        self
    }

    pub fn with_previous(mut self, previous: Option<String>) -> Self {
        self.previous = previous.and_then(non_empty);
        self
    }

    pub fn with_evidence(mut self, evidence: &[StageEvidence]) -> Self {
        self.evidence = non_empty(render_evidence(evidence));
        self
    }

    pub fn with_remaining(mut self, remaining: &[Stage]) -> Self {
        self.remaining = non_empty(remaining.iter().map(Stage::render).collect());
        self
    }

    pub fn with_history(mut self, events: &[Event]) -> Self {
        self.history = non_empty(render_events(events));
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Events rendered oldest first, one block per event.
pub fn render_events(events: &[Event]) -> String {
    events
        .iter()
        .map(|event| {
            format!(
                "[#{} {} by {}]\n{}\n",
                event.seq,
                event.kind.as_str(),
                event.author,
                event.payload.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_evidence(evidence: &[StageEvidence]) -> String {
    let mut buf = String::new();
    for item in evidence {
        let outcome = item.outcome.map_or("not run", |o| o.as_str());
        buf.push_str(&format!(
            "## Stage {} ({})\n{}\n",
            item.stage_id,
            outcome,
            item.description.trim()
        ));
        for criterion in &item.criteria {
            buf.push_str(&format!(
                "- ({}) {}\n",
                criterion.status.as_str(),
                criterion.text.trim()
            ));
        }
        if !item.artifact.trim().is_empty() {
            buf.push_str(&format!("Result:\n{}\n", item.artifact.trim()));
        }
        for note in &item.notes {
            buf.push_str(&format!("Note: {}\n", note.trim()));
        }
        buf.push('\n');
    }
    buf
}

fn engine() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    for (role, source) in [
        (Role::Planner, PLANNER_TEMPLATE),
        (Role::PlanReviewer, PLAN_REVIEWER_TEMPLATE),
        (Role::Implementer, IMPLEMENTER_TEMPLATE),
        (Role::Reviewer, REVIEWER_TEMPLATE),
        (Role::CriteriaChecker, CRITERIA_CHECKER_TEMPLATE),
        (Role::Reflector, REFLECTOR_TEMPLATE),
        (Role::Summarizer, SUMMARIZER_TEMPLATE),
        (Role::Reporter, REPORTER_TEMPLATE),
    ] {
        env.add_template(role.as_str(), source)
            .with_context(|| format!("parse {} template", role))?;
    }
    Ok(env)
}

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    /// Content after the marker, marker excluded.
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let required = kind.as_str() == "required";
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }

    sections
}

fn total_len(sections: &[ParsedSection]) -> usize {
    sections.iter().map(|s| s.content.len()).sum()
}

/// Drop droppable sections in [`DROP_ORDER`], then cut the largest section.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(section = key, bytes_dropped = sections[idx].content.len(), "dropped section for budget");
            sections.remove(idx);
        }
    }

    let total = total_len(sections);
    if total <= budget {
        return;
    }
    let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let excess = total - budget;
    let before_len = largest.content.len();
    let mut keep = before_len.saturating_sub(excess + TRUNCATION_MARKER.len());
    while !largest.content.is_char_boundary(keep) {
        keep -= 1;
    }
    largest.content.truncate(keep);
    largest.content.push_str(TRUNCATION_MARKER);
    debug!(
        section = %largest.key,
        before_len,
        after_len = largest.content.len(),
        "truncated section for budget"
    );
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds role prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build(&self, role: Role, inputs: &PromptInputs) -> Result<String> {
        let env = engine()?;
        let rendered = env
            .get_template(role.as_str())?
            .render(inputs)
            .with_context(|| format!("render {} prompt", role))?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}
