//! Role adapters that turn one generic [`Invoker`] into every collaborator
//! the engine needs.
//!
//! Each call renders the role's prompt, invokes the external program inside
//! the session working directory, and parses the reply. Producer output is
//! passed through the repetition guard before it reaches the loop.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::cancel::CancelToken;
use crate::collaborators::{
    Collaborators, ContextView, CriterionAssessment, ReflectionRequest, StageEvidence,
};
use crate::convergence::LoopContext;
use crate::core::queue::Reflection;
use crate::core::repetition::RepetitionGuard;
use crate::core::types::{CritiqueResponse, Role};
use crate::events::{Event, EventKind, Summarizer};
use crate::io::config::WorkflowConfig;
use crate::io::invoker::{InvokeRequest, InvokeResponse, Invoker};
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::plan::{Plan, Stage};

pub mod evaluator;
pub mod parse;
pub mod planner;
pub mod reflector;

/// Collaborators backed by an [`Invoker`].
pub struct AgentSuite<I> {
    invoker: I,
    prompts: PromptBuilder,
    guard: RepetitionGuard,
    workdir: PathBuf,
    calls_dir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: CancelToken,
    calls: Cell<u64>,
}

impl<I: Invoker> AgentSuite<I> {
    pub fn new(invoker: I, config: &WorkflowConfig, workdir: &Path, cancel: CancelToken) -> Self {
        Self {
            invoker,
            prompts: PromptBuilder::new(config.prompt.budget_bytes),
            guard: config.repetition_guard(),
            workdir: workdir.to_path_buf(),
            calls_dir: workdir.join(".workflow").join("calls"),
            timeout: config.invoker_timeout(),
            output_limit_bytes: config.invoker.output_limit_bytes,
            cancel,
            calls: Cell::new(0),
        }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    /// Number of external calls issued so far.
    pub fn call_count(&self) -> u64 {
        self.calls.get()
    }

    #[instrument(skip_all, fields(role = %role))]
    fn call(&self, role: Role, inputs: &PromptInputs) -> Result<InvokeResponse> {
        self.cancel.check()?;
        let prompt = self.prompts.build(role, inputs)?;
        let n = self.calls.get() + 1;
        self.calls.set(n);

        let request = InvokeRequest {
            role,
            prompt,
            workdir: self.workdir.clone(),
            output_path: self.calls_dir.join(format!("{n:04}-{role}.out")),
            timeout: self.cancel.call_timeout(self.timeout),
            output_limit_bytes: self.output_limit_bytes,
            cancel: self.cancel.clone(),
        };
        debug!(call = n, prompt_bytes = request.prompt.len(), "invoking");
        self.invoker
            .invoke(&request)
            .with_context(|| format!("{role} call #{n}"))
    }

    /// Producer call whose text is collapsed if it degenerates into repetition.
    fn produce(&self, role: Role, inputs: &PromptInputs) -> Result<String> {
        let response = self.call(role, inputs)?;
        Ok(self.guard.collapse(&response.text).into_owned())
    }

    fn critique(&self, role: Role, inputs: &PromptInputs) -> Result<CritiqueResponse> {
        let response = self.call(role, inputs)?;
        Ok(CritiqueResponse::Text {
            text: response.text,
            signal: response.signal,
        })
    }
}

/// Previous-round critique as prompt text, falling back to the raw critique
/// when it had no structured entries.
fn feedback_text(ctx: &LoopContext<'_>) -> Option<String> {
    ctx.feedback.map(|verdict| {
        let rendered = verdict.render_feedback();
        if rendered.trim().is_empty() {
            verdict.raw_text.clone()
        } else {
            rendered
        }
    })
}

/// Payload of the newest artifact `author` produced, if any.
fn last_produced(events: &[Event], author: Role) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Produce && e.author == author.as_str())
        .map(|e| e.payload.clone())
}

impl<I: Invoker> Summarizer for AgentSuite<I> {
    fn summarize(&self, events: &[Event]) -> Result<String> {
        let inputs = PromptInputs::new("").with_history(events);
        Ok(self.call(Role::Summarizer, &inputs)?.text)
    }
}

impl<I: Invoker> Collaborators for AgentSuite<I> {
    fn draft_plan(&self, ctx: &LoopContext<'_>) -> Result<Plan> {
        let previous = ctx
            .feedback
            .and_then(|_| last_produced(ctx.events, Role::Planner));
        let inputs = PromptInputs::new(ctx.goal)
            .with_iteration(ctx.iteration)
            .with_feedback(feedback_text(ctx))
            .with_previous(previous)
            .with_history(ctx.events);
        let raw = self.produce(Role::Planner, &inputs)?;
        planner::parse_plan(&raw)
    }

    fn review_plan(&self, plan: &Plan, ctx: &LoopContext<'_>) -> Result<CritiqueResponse> {
        let inputs = PromptInputs::new(ctx.goal)
            .with_iteration(ctx.iteration)
            .with_artifact(&plan.render())
            .with_feedback(feedback_text(ctx))
            .with_history(ctx.events);
        self.critique(Role::PlanReviewer, &inputs)
    }

    fn implement(&self, stage: &Stage, ctx: &LoopContext<'_>) -> Result<String> {
        let inputs = PromptInputs::new(ctx.goal)
            .with_iteration(ctx.iteration)
            .with_stage(stage)
            .with_feedback(feedback_text(ctx))
            .with_history(ctx.events);
        self.produce(Role::Implementer, &inputs)
    }

    fn review_implementation(
        &self,
        stage: &Stage,
        artifact: &str,
        ctx: &LoopContext<'_>,
    ) -> Result<CritiqueResponse> {
        let inputs = PromptInputs::new(ctx.goal)
            .with_iteration(ctx.iteration)
            .with_stage(stage)
            .with_artifact(artifact)
            .with_feedback(feedback_text(ctx))
            .with_history(ctx.events);
        self.critique(Role::Reviewer, &inputs)
    }

    fn evaluate_criteria(
        &self,
        stage: &Stage,
        artifact: &str,
        view: ContextView<'_>,
    ) -> Result<Vec<CriterionAssessment>> {
        let inputs = PromptInputs::new(view.goal)
            .with_stage(stage)
            .with_artifact(artifact)
            .with_history(view.events);
        let response = self.call(Role::CriteriaChecker, &inputs)?;
        evaluator::parse_assessments(&response.text)
    }

    fn reflect(&self, request: ReflectionRequest<'_>) -> Result<Reflection> {
        let inputs = PromptInputs::new(request.view.goal)
            .with_evidence(request.evidence)
            .with_remaining(request.remaining)
            .with_history(request.view.events);
        let response = self.call(Role::Reflector, &inputs)?;
        reflector::parse_reflection(&response.text)
    }

    fn final_report(&self, evidence: &[StageEvidence], view: ContextView<'_>) -> Result<String> {
        let inputs = PromptInputs::new(view.goal)
            .with_evidence(evidence)
            .with_history(view.events);
        self.produce(Role::Reporter, &inputs)
    }
}
