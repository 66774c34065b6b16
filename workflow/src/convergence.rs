//! The produce/critique convergence loop.
//!
//! One state machine serves as both the planning loop (artifact = plan) and
//! the implementation loop (artifact = implementation summary for a stage).
//! Each round produces an artifact, critiques it, normalizes the critique
//! into a [`Verdict`], and stops on approval, stagnation, or the iteration
//! cap, whichever comes first. Every call reads its context from the event
//! log and appends its result to it.

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::stagnation::StagnationDetector;
use crate::core::types::{CritiqueResponse, LoopKind, LoopOutcome, Role, Verdict};
use crate::error::WorkflowError;
use crate::events::{Event, EventKind, EventLog, Summarizer};
use crate::plan::{Plan, Stage};

/// Something a producer hands to a critic.
pub trait Artifact {
    /// Text recorded in the event log.
    fn render(&self) -> String;
}

impl Artifact for Plan {
    fn render(&self) -> String {
        Plan::render(self)
    }
}

impl Artifact for String {
    fn render(&self) -> String {
        self.clone()
    }
}

/// Everything a produce or critique call may look at.
#[derive(Debug, Clone, Copy)]
pub struct LoopContext<'a> {
    pub goal: &'a str,
    pub kind: LoopKind,
    /// The stage an implementation loop is scoped to.
    pub scope: Option<&'a Stage>,
    /// 1-based round number.
    pub iteration: u32,
    /// Verdict of the previous round, fed back into the next produce call.
    pub feedback: Option<&'a Verdict>,
    /// Verdicts before `feedback`, oldest first, bounded by the stagnation window.
    pub history: &'a [Verdict],
    pub events: &'a [Event],
}

/// Per-invocation loop state. Discarded when `run` returns.
#[derive(Debug, Default)]
struct LoopState {
    iteration: u32,
    last: Option<Verdict>,
    history: Vec<Verdict>,
}

impl LoopState {
    fn record(&mut self, verdict: Verdict, window: usize) {
        if let Some(previous) = self.last.take() {
            self.history.push(previous);
            if self.history.len() > window {
                self.history.remove(0);
            }
        }
        self.last = Some(verdict);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopResult<A> {
    pub artifact: A,
    pub outcome: LoopOutcome,
    /// Produce/critique rounds issued.
    pub iterations: u32,
    pub last_verdict: Verdict,
}

/// A loop stopped by a failed call or cancellation, with the rounds it got through.
#[derive(Debug, Error)]
#[error("{error} (after {iterations} round(s))")]
pub struct LoopFailure {
    #[source]
    pub error: WorkflowError,
    /// Rounds whose produce call was issued.
    pub iterations: u32,
}

impl From<LoopFailure> for WorkflowError {
    fn from(failure: LoopFailure) -> Self {
        failure.error
    }
}

impl<A> LoopResult<A> {
    /// The error a non-approved outcome maps to. `stage_id` scopes it to a stage.
    pub fn failure(&self, stage_id: Option<&str>) -> Option<WorkflowError> {
        let iterations = self.iterations;
        match (self.outcome, stage_id) {
            (LoopOutcome::Approved, _) => None,
            (LoopOutcome::Exhausted, None) => Some(WorkflowError::PlanningExhausted { iterations }),
            (LoopOutcome::Stagnant, None) => Some(WorkflowError::PlanningStagnant { iterations }),
            (LoopOutcome::Exhausted, Some(id)) => Some(WorkflowError::ImplementationExhausted {
                stage_id: id.to_string(),
                iterations,
            }),
            (LoopOutcome::Stagnant, Some(id)) => Some(WorkflowError::ImplementationStagnant {
                stage_id: id.to_string(),
                iterations,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceLoop<'a> {
    kind: LoopKind,
    max_iterations: u32,
    detector: StagnationDetector,
    cancel: &'a CancelToken,
}

impl<'a> ConvergenceLoop<'a> {
    /// `max_iterations` below 1 is raised to 1 so a round always happens.
    pub fn new(
        kind: LoopKind,
        max_iterations: u32,
        detector: StagnationDetector,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            kind,
            max_iterations: max_iterations.max(1),
            detector,
            cancel,
        }
    }

    /// Run rounds until approval, stagnation, or the iteration cap.
    ///
    /// A failed produce or critique call is recorded as an error event and
    /// returned as [`WorkflowError::CollaboratorCallFailure`], or as
    /// [`WorkflowError::Cancelled`] when the session was stopped meanwhile.
    /// Either way the [`LoopFailure`] carries the rounds already issued.
    #[instrument(skip_all, fields(kind = ?self.kind, stage = scope.map(|s| s.id.as_str())))]
    pub fn run<A, S, P, C>(
        &self,
        goal: &str,
        scope: Option<&Stage>,
        log: &mut EventLog,
        summarizer: &S,
        mut produce: P,
        mut critique: C,
    ) -> Result<LoopResult<A>, LoopFailure>
    where
        A: Artifact,
        S: Summarizer + ?Sized,
        P: FnMut(&LoopContext<'_>) -> anyhow::Result<A>,
        C: FnMut(&A, &LoopContext<'_>) -> anyhow::Result<CritiqueResponse>,
    {
        let producer = self.kind.producer();
        let critic = self.kind.critic();
        let stage_id = scope.map(|s| s.id.as_str());
        let mut state = LoopState::default();

        loop {
            self.proceed(state.iteration)?;
            state.iteration += 1;
            let iteration = state.iteration;

            log.maybe_compact(summarizer, self.cancel);
            let produced = produce(&LoopContext {
                goal,
                kind: self.kind,
                scope,
                iteration,
                feedback: state.last.as_ref(),
                history: &state.history,
                events: log.view(),
            });
            let artifact = match produced {
                Ok(artifact) => artifact,
                Err(cause) => return Err(self.call_failed(log, producer, cause, iteration)),
            };
            log.append_with_metadata(
                producer.as_str(),
                EventKind::Produce,
                artifact.render(),
                Some(json!({ "loop": self.kind, "iteration": iteration, "stage": stage_id })),
            );

            self.proceed(iteration)?;
            log.maybe_compact(summarizer, self.cancel);
            let critiqued = critique(
                &artifact,
                &LoopContext {
                    goal,
                    kind: self.kind,
                    scope,
                    iteration,
                    feedback: state.last.as_ref(),
                    history: &state.history,
                    events: log.view(),
                },
            );
            let verdict = match critiqued {
                Ok(response) => response.into_verdict(),
                Err(cause) => return Err(self.call_failed(log, critic, cause, iteration)),
            };
            log.append_with_metadata(
                critic.as_str(),
                EventKind::Critique,
                verdict.raw_text.clone(),
                Some(json!({
                    "loop": self.kind,
                    "iteration": iteration,
                    "stage": stage_id,
                    "approved": verdict.approved,
                    "blocking_issues": verdict.blocking_issues.len(),
                })),
            );
            debug!(
                iteration,
                approved = verdict.approved,
                blocking = verdict.blocking_issues.len(),
                "critique normalized"
            );

            let outcome = if verdict.approved {
                Some(LoopOutcome::Approved)
            } else if self.stagnant(&state, &verdict) {
                Some(LoopOutcome::Stagnant)
            } else if iteration >= self.max_iterations {
                Some(LoopOutcome::Exhausted)
            } else {
                None
            };

            if let Some(outcome) = outcome {
                info!(iteration, outcome = outcome.as_str(), "convergence loop finished");
                return Ok(LoopResult {
                    artifact,
                    outcome,
                    iterations: iteration,
                    last_verdict: verdict,
                });
            }
            state.record(verdict, self.detector.window());
        }
    }

    fn stagnant(&self, state: &LoopState, newest: &Verdict) -> bool {
        let mut prior = state.history.clone();
        prior.extend(state.last.iter().cloned());
        self.detector.is_stagnant(&prior, newest)
    }

    fn proceed(&self, iterations: u32) -> Result<(), LoopFailure> {
        self.cancel
            .check()
            .map_err(|error| LoopFailure { error, iterations })
    }

    fn call_failed(
        &self,
        log: &mut EventLog,
        role: Role,
        cause: anyhow::Error,
        iterations: u32,
    ) -> LoopFailure {
        if self.cancel.is_cancelled() {
            warn!(%role, "call interrupted by cancellation");
            log.append(role.as_str(), EventKind::Error, "call interrupted by cancellation");
            return LoopFailure {
                error: WorkflowError::Cancelled,
                iterations,
            };
        }
        let error = WorkflowError::collaborator(role, cause);
        warn!(error = %error, "collaborator call failed");
        log.append(role.as_str(), EventKind::Error, error.to_string());
        LoopFailure { error, iterations }
    }
}
