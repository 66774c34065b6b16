//! One end-to-end session: planning loop, stage orchestration, final report.
//!
//! A session owns its event log, cancellation token, and working directory.
//! Nothing is shared between sessions, so independent sessions can run on
//! separate threads.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::agents::AgentSuite;
use crate::cancel::CancelToken;
use crate::collaborators::{Collaborators, ContextView, StageEvidence};
use crate::convergence::ConvergenceLoop;
use crate::core::invariants::validate_plan;
use crate::core::types::{LoopKind, LoopOutcome, Role};
use crate::error::WorkflowError;
use crate::events::{CompactionStats, Event, EventKind, EventLog};
use crate::io::config::WorkflowConfig;
use crate::io::invoker::CommandInvoker;
use crate::io::scratch::ScratchDir;
use crate::orchestrator::{Orchestrator, RunStatus, StageReport};
use crate::plan::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Finished,
    Aborted,
    PlanningFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanningSummary {
    pub iterations: u32,
    /// `None` when planning stopped on an error before any outcome.
    pub outcome: Option<LoopOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub kind: &'static str,
    pub message: String,
}

impl From<&WorkflowError> for ErrorSummary {
    fn from(err: &WorkflowError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Everything a caller learns about a session. Always lists every stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub goal: String,
    pub status: SessionStatus,
    pub planning: PlanningSummary,
    pub stages: Vec<StageReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_report: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_error: Option<String>,
    pub stage_runs: usize,
    pub compaction: CompactionStats,
    pub event_count: usize,
}

impl SessionReport {
    /// Stages that finished with at least one criterion not met, or failed.
    pub fn stages_with_gaps(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| !s.unmet_criteria.is_empty())
    }
}

pub struct Session<C> {
    config: WorkflowConfig,
    collab: C,
    cancel: CancelToken,
    log: EventLog,
    /// Released after `collab` when the session drops.
    scratch: Option<ScratchDir>,
}

impl Session<AgentSuite<CommandInvoker>> {
    /// Session backed by the configured external command, running inside
    /// `working_dir` or a fresh temporary directory.
    pub fn with_command_invoker(
        config: WorkflowConfig,
        working_dir: Option<&Path>,
        keep_files: bool,
        cancel: CancelToken,
    ) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;
        let scratch = ScratchDir::acquire(working_dir, keep_files)?;
        let invoker = CommandInvoker::new(config.invoker.command.clone())?;
        let suite = AgentSuite::new(invoker, &config, scratch.path(), cancel.clone());
        Ok(Session::new(config, suite, cancel).with_scratch(scratch))
    }
}

impl<C: Collaborators> Session<C> {
    pub fn new(config: WorkflowConfig, collab: C, cancel: CancelToken) -> Self {
        let log = EventLog::new(config.compaction);
        Self {
            config,
            collab,
            cancel,
            log,
            scratch: None,
        }
    }

    pub fn with_scratch(mut self, scratch: ScratchDir) -> Self {
        self.scratch = Some(scratch);
        self
    }

    pub fn collaborators(&self) -> &C {
        &self.collab
    }

    pub fn events(&self) -> &[Event] {
        self.log.view()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.scratch.as_ref().map(ScratchDir::path)
    }

    /// Release the working directory now, reporting removal errors.
    pub fn close(mut self) -> anyhow::Result<()> {
        match self.scratch.take() {
            Some(scratch) => scratch.close(),
            None => Ok(()),
        }
    }

    #[instrument(skip_all, fields(goal_len = goal.len()))]
    pub fn run(&mut self, goal: &str) -> SessionReport {
        let goal = goal.trim();
        info!("session started");

        let (plan, planning) = match self.plan(goal) {
            Ok(planned) => planned,
            Err((err, planning)) => {
                let status = match &err {
                    WorkflowError::Cancelled | WorkflowError::CollaboratorCallFailure { .. } => {
                        SessionStatus::Aborted
                    }
                    _ => SessionStatus::PlanningFailed,
                };
                error!(error = %err, ?status, "planning failed");
                return self.report(goal, status, planning, Vec::new(), 0, Some(&err), None);
            }
        };

        let orchestration =
            Orchestrator::new(&self.collab, self.config.orchestrator(), &self.cancel)
                .run(goal, plan, &mut self.log);
        let status = match orchestration.status {
            RunStatus::Finished => SessionStatus::Finished,
            RunStatus::Aborted => SessionStatus::Aborted,
        };

        let final_report = if self.config.final_report && !self.cancel.is_cancelled() {
            Some(self.final_report(goal, &orchestration.evidence))
        } else {
            None
        };

        self.report(
            goal,
            status,
            planning,
            orchestration.stages,
            orchestration.stage_runs,
            orchestration.error.as_ref(),
            final_report,
        )
    }

    /// Planning loop plus plan validation.
    fn plan(&mut self, goal: &str) -> Result<(Plan, PlanningSummary), (WorkflowError, PlanningSummary)> {
        let collab = &self.collab;
        let looper = ConvergenceLoop::new(
            LoopKind::Planning,
            self.config.planning.max_iterations,
            self.config.detector(),
            &self.cancel,
        );
        let result = looper.run(
            goal,
            None,
            &mut self.log,
            collab,
            |ctx| collab.draft_plan(ctx),
            |plan, ctx| collab.review_plan(plan, ctx),
        );
        let result = match result {
            Ok(result) => result,
            Err(failure) => {
                let summary = PlanningSummary {
                    iterations: failure.iterations,
                    outcome: None,
                };
                return Err((failure.error, summary));
            }
        };

        let summary = PlanningSummary {
            iterations: result.iterations,
            outcome: Some(result.outcome),
        };
        if let Some(err) = result.failure(None) {
            return Err((err, summary));
        }
        let violations = validate_plan(&result.artifact);
        if !violations.is_empty() {
            let err = WorkflowError::InvalidPlan(violations);
            self.log.append("session", EventKind::Error, err.to_string());
            return Err((err, summary));
        }
        info!(stages = result.artifact.stages.len(), iterations = result.iterations, "plan approved");
        Ok((result.artifact, summary))
    }

    /// Narrative report. Failure is recorded, never fatal.
    fn final_report(&mut self, goal: &str, evidence: &[StageEvidence]) -> Result<String, String> {
        self.log.maybe_compact(&self.collab, &self.cancel);
        let view = ContextView {
            goal,
            events: self.log.view(),
        };
        match self.collab.final_report(evidence, view) {
            Ok(text) => {
                self.log.append(Role::Reporter.as_str(), EventKind::Produce, text.as_str());
                Ok(text)
            }
            Err(cause) => {
                let err = WorkflowError::collaborator(Role::Reporter, cause);
                warn!(error = %err, "final report failed");
                self.log.append(Role::Reporter.as_str(), EventKind::Error, err.to_string());
                Err(err.to_string())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report(
        &self,
        goal: &str,
        status: SessionStatus,
        planning: PlanningSummary,
        stages: Vec<StageReport>,
        stage_runs: usize,
        err: Option<&WorkflowError>,
        final_report: Option<Result<String, String>>,
    ) -> SessionReport {
        let (final_report, report_error) = match final_report {
            Some(Ok(text)) => (Some(text), None),
            Some(Err(message)) => (None, Some(message)),
            None => (None, None),
        };
        info!(?status, stages = stages.len(), events = self.log.len(), "session finished");
        SessionReport {
            goal: goal.to_string(),
            status,
            planning,
            stages,
            error: err.map(ErrorSummary::from),
            final_report,
            report_error,
            stage_runs,
            compaction: self.log.stats(),
            event_count: self.log.len(),
        }
    }
}
