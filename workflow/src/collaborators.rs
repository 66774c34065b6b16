//! Interfaces to the external calls the engine depends on.
//!
//! The engine never generates or interprets content itself. Every produce,
//! critique, evaluation, reflection, summarization, and report step goes
//! through [`Collaborators`]; any error returned here is treated as a fatal
//! collaborator call failure, never as an approval.

use serde::{Deserialize, Serialize};

use crate::convergence::LoopContext;
use crate::core::queue::Reflection;
use crate::core::types::{CritiqueResponse, LoopOutcome};
use crate::events::{Event, Summarizer};
use crate::plan::{Criterion, CriterionStatus, Plan, Stage};

/// Read-only context for calls made outside a convergence loop.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    pub goal: &'a str,
    pub events: &'a [Event],
}

/// One criterion verdict from the criteria checker, by position in the stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionAssessment {
    pub index: usize,
    pub status: CriterionStatus,
    #[serde(default)]
    pub evidence: String,
}

/// What one processed stage left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageEvidence {
    pub stage_id: String,
    pub description: String,
    /// `None` when the stage never reached a loop outcome.
    pub outcome: Option<LoopOutcome>,
    pub artifact: String,
    pub criteria: Vec<Criterion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// Input of the reflection call.
#[derive(Debug, Clone, Copy)]
pub struct ReflectionRequest<'a> {
    pub view: ContextView<'a>,
    pub evidence: &'a [StageEvidence],
    pub remaining: &'a [Stage],
}

pub trait Collaborators: Summarizer {
    /// Produce a candidate plan. Feedback from the last review is in `ctx`.
    fn draft_plan(&self, ctx: &LoopContext<'_>) -> anyhow::Result<Plan>;

    fn review_plan(&self, plan: &Plan, ctx: &LoopContext<'_>) -> anyhow::Result<CritiqueResponse>;

    /// Produce the implementation summary for one stage.
    fn implement(&self, stage: &Stage, ctx: &LoopContext<'_>) -> anyhow::Result<String>;

    fn review_implementation(
        &self,
        stage: &Stage,
        artifact: &str,
        ctx: &LoopContext<'_>,
    ) -> anyhow::Result<CritiqueResponse>;

    /// Inspect produced artifacts and report a status per criterion.
    fn evaluate_criteria(
        &self,
        stage: &Stage,
        artifact: &str,
        view: ContextView<'_>,
    ) -> anyhow::Result<Vec<CriterionAssessment>>;

    fn reflect(&self, request: ReflectionRequest<'_>) -> anyhow::Result<Reflection>;

    /// Narrative summary of the whole session.
    fn final_report(&self, evidence: &[StageEvidence], view: ContextView<'_>)
    -> anyhow::Result<String>;
}
