//! Stage orchestrator: runs an approved plan stage by stage.
//!
//! Per stage: implementation loop, then criteria evaluation (approved stages
//! only), then reflection over the remaining queue. A stage that does not
//! converge fails; with `fail_fast` the plan is aborted, otherwise the next
//! stage runs. Collaborator failures and cancellation always abort.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::cancel::CancelToken;
use crate::collaborators::{Collaborators, ContextView, ReflectionRequest, StageEvidence};
use crate::convergence::ConvergenceLoop;
use crate::core::queue::{Reflection, apply_reflection};
use crate::core::stagnation::StagnationDetector;
use crate::core::types::{LoopKind, LoopOutcome, Role};
use crate::error::WorkflowError;
use crate::events::{EventKind, EventLog};
use crate::plan::{Criterion, Plan, Stage, StageStatus};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    pub fail_fast: bool,
    /// Upper bound on stages popped in one session, reflection-inserted ones included.
    pub max_stage_runs: usize,
    pub detector: StagnationDetector,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            fail_fast: true,
            max_stage_runs: 50,
            detector: StagnationDetector::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Finished,
    Aborted,
}

/// Terminal state of one stage, processed or still queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub id: String,
    pub description: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<LoopOutcome>,
    pub iterations: u32,
    pub criteria: Vec<Criterion>,
    pub unmet_criteria: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageReport {
    fn new(stage: &Stage, outcome: Option<LoopOutcome>, iterations: u32) -> Self {
        Self {
            id: stage.id.clone(),
            description: stage.description.clone(),
            status: stage.status,
            outcome,
            iterations,
            criteria: stage.criteria.clone(),
            unmet_criteria: stage.unmet_criteria(),
            error: None,
        }
    }

    /// Report for a stage that never left the queue.
    pub fn queued(stage: &Stage) -> Self {
        Self::new(stage, None, 0)
    }
}

#[derive(Debug)]
pub struct OrchestrationReport {
    pub status: RunStatus,
    /// Processed stages in run order, followed by whatever was still queued.
    pub stages: Vec<StageReport>,
    pub evidence: Vec<StageEvidence>,
    /// Set when the plan was aborted.
    pub error: Option<WorkflowError>,
    pub stage_runs: usize,
}

pub struct Orchestrator<'a, C: ?Sized> {
    collab: &'a C,
    config: OrchestratorConfig,
    cancel: &'a CancelToken,
}

/// Result of running one stage through the loop and evaluation.
struct StageRun {
    report: StageReport,
    evidence: StageEvidence,
    fatal: Option<WorkflowError>,
}

impl<'a, C> Orchestrator<'a, C>
where
    C: Collaborators + ?Sized,
{
    pub fn new(collab: &'a C, config: OrchestratorConfig, cancel: &'a CancelToken) -> Self {
        Self {
            collab,
            config,
            cancel,
        }
    }

    /// Run every stage of `plan`. Always returns a report listing all stages.
    #[instrument(skip_all, fields(stages = plan.stages.len(), fail_fast = self.config.fail_fast))]
    pub fn run(&self, goal: &str, mut plan: Plan, log: &mut EventLog) -> OrchestrationReport {
        plan.reset();
        let mut queue: VecDeque<Stage> = plan.stages.into();
        let mut processed: HashSet<String> = HashSet::new();
        let mut reports = Vec::new();
        let mut evidence = Vec::new();
        let mut runs = 0usize;
        let mut abort: Option<WorkflowError> = None;

        while !queue.is_empty() {
            if let Err(err) = self.cancel.check() {
                abort = Some(err);
                break;
            }
            if runs >= self.config.max_stage_runs {
                warn!(runs, remaining = queue.len(), "stage run cap reached");
                abort = Some(WorkflowError::OrchestrationLimit(runs));
                break;
            }
            let Some(mut stage) = queue.pop_front() else {
                break;
            };
            runs += 1;
            processed.insert(stage.id.clone());

            let run = self.run_stage(goal, &mut stage, log);
            reports.push(run.report);
            evidence.push(run.evidence);
            if let Some(err) = run.fatal {
                abort = Some(err);
                break;
            }

            if let Err(err) = self.reflect(goal, &stage, &mut queue, &processed, &evidence, log) {
                abort = Some(err);
                break;
            }
        }

        reports.extend(queue.iter().map(StageReport::queued));
        let status = if abort.is_some() {
            RunStatus::Aborted
        } else {
            RunStatus::Finished
        };
        info!(?status, runs, "orchestration finished");
        OrchestrationReport {
            status,
            stages: reports,
            evidence,
            error: abort,
            stage_runs: runs,
        }
    }

    #[instrument(skip_all, fields(stage_id = %stage.id))]
    fn run_stage(&self, goal: &str, stage: &mut Stage, log: &mut EventLog) -> StageRun {
        stage.status = StageStatus::Active;
        info!("stage started");

        let looper = ConvergenceLoop::new(
            LoopKind::Implementation,
            self.config.max_iterations,
            self.config.detector,
            self.cancel,
        );
        let current: &Stage = stage;
        let result = looper.run(
            goal,
            Some(current),
            log,
            self.collab,
            |ctx| self.collab.implement(current, ctx),
            |artifact, ctx| self.collab.review_implementation(current, artifact, ctx),
        );

        let result = match result {
            Ok(result) => result,
            Err(failure) => {
                stage.status = StageStatus::Failed;
                return self.finish(
                    stage,
                    None,
                    failure.iterations,
                    String::new(),
                    Some(failure.error),
                    true,
                );
            }
        };

        if let Some(loop_err) = result.failure(Some(&stage.id)) {
            stage.status = StageStatus::Failed;
            let err = WorkflowError::StageFailed {
                stage_id: stage.id.clone(),
                source: Box::new(loop_err),
            };
            warn!(error = %err, "stage failed");
            log.append("orchestrator", EventKind::Error, err.to_string());
            let fatal = self.config.fail_fast;
            return self.finish(
                stage,
                Some(result.outcome),
                result.iterations,
                result.artifact,
                Some(err),
                fatal,
            );
        }

        if let Err(err) = self.evaluate(goal, stage, &result.artifact, log) {
            stage.status = StageStatus::Failed;
            return self.finish(
                stage,
                Some(result.outcome),
                result.iterations,
                result.artifact,
                Some(err),
                true,
            );
        }

        stage.status = StageStatus::Complete;
        if stage.all_criteria_met() {
            info!("stage complete");
        } else {
            info!(unmet = stage.unmet_criteria().len(), "stage complete with gaps");
        }
        self.finish(
            stage,
            Some(result.outcome),
            result.iterations,
            result.artifact,
            None,
            false,
        )
    }

    fn finish(
        &self,
        stage: &Stage,
        outcome: Option<LoopOutcome>,
        iterations: u32,
        artifact: String,
        err: Option<WorkflowError>,
        fatal: bool,
    ) -> StageRun {
        let mut report = StageReport::new(stage, outcome, iterations);
        report.error = err.as_ref().map(ToString::to_string);
        let evidence = StageEvidence {
            stage_id: stage.id.clone(),
            description: stage.description.clone(),
            outcome,
            artifact,
            criteria: stage.criteria.clone(),
            notes: report.error.iter().cloned().collect(),
        };
        StageRun {
            report,
            evidence,
            fatal: if fatal { err } else { None },
        }
    }

    /// Update criterion statuses from the checker's assessments.
    fn evaluate(
        &self,
        goal: &str,
        stage: &mut Stage,
        artifact: &str,
        log: &mut EventLog,
    ) -> Result<(), WorkflowError> {
        self.cancel.check()?;
        log.maybe_compact(self.collab, self.cancel);
        let view = ContextView {
            goal,
            events: log.view(),
        };
        let assessments = match self.collab.evaluate_criteria(stage, artifact, view) {
            Ok(assessments) => assessments,
            Err(cause) => return Err(self.call_failed(log, Role::CriteriaChecker, cause)),
        };

        let mut lines = Vec::new();
        for assessment in assessments {
            let Some(criterion) = stage.criteria.get_mut(assessment.index) else {
                warn!(index = assessment.index, "assessment for unknown criterion ignored");
                continue;
            };
            criterion.status = assessment.status;
            lines.push(format!(
                "- ({}) {}: {}",
                assessment.status.as_str(),
                criterion.text,
                assessment.evidence.trim()
            ));
        }

        let met = stage.criteria.len() - stage.unmet_criteria().len();
        log.append_with_metadata(
            Role::CriteriaChecker.as_str(),
            EventKind::Evaluation,
            format!("Criteria for stage {}:\n{}", stage.id, lines.join("\n")),
            Some(json!({ "stage": stage.id, "met": met, "total": stage.criteria.len() })),
        );
        Ok(())
    }

    fn reflect(
        &self,
        goal: &str,
        after: &Stage,
        queue: &mut VecDeque<Stage>,
        processed: &HashSet<String>,
        evidence: &[StageEvidence],
        log: &mut EventLog,
    ) -> Result<(), WorkflowError> {
        self.cancel.check()?;
        log.maybe_compact(self.collab, self.cancel);
        let request = ReflectionRequest {
            view: ContextView {
                goal,
                events: log.view(),
            },
            evidence,
            remaining: queue.make_contiguous(),
        };
        let reflection = match self.collab.reflect(request) {
            Ok(reflection) => reflection,
            Err(cause) => return Err(self.call_failed(log, Role::Reflector, cause)),
        };

        let notes = match &reflection {
            Reflection::Unchanged => String::new(),
            Reflection::Replace { notes, .. } => notes.clone(),
        };
        let (payload, metadata) = match apply_reflection(queue, processed, reflection) {
            Ok(change) => {
                if !change.is_empty() {
                    info!(change = %change.summary(), "reflection updated the queue");
                }
                (
                    format!("Queue after stage {}: {}", after.id, change.summary()),
                    json!({ "after_stage": after.id, "accepted": true, "change": change }),
                )
            }
            Err(errors) => {
                warn!(errors = ?errors, "reflection rejected; queue left unchanged");
                (
                    format!(
                        "Reflection after stage {} rejected: {}",
                        after.id,
                        errors.join("; ")
                    ),
                    json!({ "after_stage": after.id, "accepted": false, "errors": errors }),
                )
            }
        };
        let payload = if notes.trim().is_empty() {
            payload
        } else {
            format!("{}\n{}", payload, notes.trim())
        };
        log.append_with_metadata(
            Role::Reflector.as_str(),
            EventKind::Reflection,
            payload,
            Some(metadata),
        );
        Ok(())
    }

    fn call_failed(&self, log: &mut EventLog, role: Role, cause: anyhow::Error) -> WorkflowError {
        if self.cancel.is_cancelled() {
            log.append(role.as_str(), EventKind::Error, "call interrupted by cancellation");
            return WorkflowError::Cancelled;
        }
        let err = WorkflowError::collaborator(role, cause);
        warn!(error = %err, "collaborator call failed");
        log.append(role.as_str(), EventKind::Error, err.to_string());
        err
    }
}
