//! Error taxonomy of the workflow engine.
//!
//! Loop outcomes (`Exhausted`, `Stagnant`) surface as the `Planning*` and
//! `Implementation*` variants; the orchestrator scopes the latter to a stage
//! with [`WorkflowError::StageFailed`]. Any failed external call becomes
//! [`WorkflowError::CollaboratorCallFailure`] and is fatal to the session.

use thiserror::Error;

use crate::core::types::Role;

pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("planning did not converge within {iterations} iterations")]
    PlanningExhausted { iterations: u32 },

    #[error("planning stagnated after {iterations} iterations: the reviewer keeps raising the same issues")]
    PlanningStagnant { iterations: u32 },

    #[error("stage '{stage_id}' did not converge within {iterations} iterations")]
    ImplementationExhausted { stage_id: String, iterations: u32 },

    #[error("stage '{stage_id}' stagnated after {iterations} iterations: the reviewer keeps raising the same issues")]
    ImplementationStagnant { stage_id: String, iterations: u32 },

    #[error("stage '{stage_id}' failed: {source}")]
    StageFailed {
        stage_id: String,
        source: Box<WorkflowError>,
    },

    /// Logged by the event log; never returned from a session.
    #[error("event compaction failed: {0}")]
    CompactionFailure(String),

    #[error("{role} call failed: {cause:#}")]
    CollaboratorCallFailure { role: Role, cause: anyhow::Error },

    #[error("invalid plan: {}", .0.join("; "))]
    InvalidPlan(Vec<String>),

    #[error("session cancelled")]
    Cancelled,

    #[error("orchestrator stopped after {0} stage runs")]
    OrchestrationLimit(usize),
}

impl WorkflowError {
    pub fn collaborator(role: Role, cause: anyhow::Error) -> Self {
        WorkflowError::CollaboratorCallFailure { role, cause }
    }

    /// Stable identifier used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::PlanningExhausted { .. } => "planning_exhausted",
            WorkflowError::PlanningStagnant { .. } => "planning_stagnant",
            WorkflowError::ImplementationExhausted { .. } => "implementation_exhausted",
            WorkflowError::ImplementationStagnant { .. } => "implementation_stagnant",
            WorkflowError::StageFailed { .. } => "stage_failed",
            WorkflowError::CompactionFailure(_) => "compaction_failure",
            WorkflowError::CollaboratorCallFailure { .. } => "collaborator_call_failure",
            WorkflowError::InvalidPlan(_) => "invalid_plan",
            WorkflowError::Cancelled => "cancelled",
            WorkflowError::OrchestrationLimit(_) => "orchestration_limit",
        }
    }
}
