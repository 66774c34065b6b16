//! Shared deterministic types for the workflow core.
//!
//! These types define stable contracts between the loops and their
//! collaborators. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The external role a generation call is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Planner,
    PlanReviewer,
    Implementer,
    Reviewer,
    CriteriaChecker,
    Reflector,
    Summarizer,
    Reporter,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::PlanReviewer => "plan_reviewer",
            Role::Implementer => "implementer",
            Role::Reviewer => "reviewer",
            Role::CriteriaChecker => "criteria_checker",
            Role::Reflector => "reflector",
            Role::Summarizer => "summarizer",
            Role::Reporter => "reporter",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side-channel approval raised by a critique call, distinct from its text.
///
/// Absence means "no signal", never rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationSignal;

/// Tagged critique result for collaborators that can emit structure directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feedback {
    Approve,
    Reject {
        blocking_issues: Vec<String>,
        suggestions: Vec<String>,
    },
}

/// What a critique call hands back to a convergence loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CritiqueResponse {
    Structured(Feedback),
    /// Free text plus the optional termination side channel. Goes through
    /// the decision normalizer.
    Text {
        text: String,
        signal: Option<TerminationSignal>,
    },
}

impl CritiqueResponse {
    pub fn text(text: impl Into<String>) -> Self {
        CritiqueResponse::Text {
            text: text.into(),
            signal: None,
        }
    }

    pub fn approved_text(text: impl Into<String>) -> Self {
        CritiqueResponse::Text {
            text: text.into(),
            signal: Some(TerminationSignal),
        }
    }
}

/// Normalized accept/reject decision. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub approved: bool,
    pub blocking_issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub raw_text: String,
}

impl Verdict {
    /// Blocking issues joined into one block for similarity checks and prompts.
    pub fn blocking_text(&self) -> String {
        self.blocking_issues.join("\n")
    }

    /// Markdown feedback fed into the next produce call.
    pub fn render_feedback(&self) -> String {
        let mut buf = String::new();
        if !self.blocking_issues.is_empty() {
            buf.push_str("Blocking issues:\n");
            for issue in &self.blocking_issues {
                buf.push_str(&format!("- {}\n", issue.trim()));
            }
        }
        if !self.suggestions.is_empty() {
            buf.push_str("Suggestions:\n");
            for suggestion in &self.suggestions {
                buf.push_str(&format!("- {}\n", suggestion.trim()));
            }
        }
        buf
    }
}

/// Which convergence loop instance is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    Planning,
    Implementation,
}

impl LoopKind {
    pub fn producer(self) -> Role {
        match self {
            LoopKind::Planning => Role::Planner,
            LoopKind::Implementation => Role::Implementer,
        }
    }

    pub fn critic(self) -> Role {
        match self {
            LoopKind::Planning => Role::PlanReviewer,
            LoopKind::Implementation => Role::Reviewer,
        }
    }
}

/// Terminal outcome of one convergence loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    Approved,
    Exhausted,
    Stagnant,
}

impl LoopOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopOutcome::Approved => "approved",
            LoopOutcome::Exhausted => "exhausted",
            LoopOutcome::Stagnant => "stagnant",
        }
    }
}
