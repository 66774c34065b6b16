//! Stable exit codes for workflow CLI commands.

use crate::session::SessionStatus;

/// Command succeeded, or the session finished (possibly with criteria gaps).
pub const OK: i32 = 0;
/// Invalid input, configuration, or plan, or any other fatal error.
pub const INVALID: i32 = 1;
/// Planning did not converge on a valid plan.
pub const PLANNING_FAILED: i32 = 2;
/// The session was aborted: stage failure, safety cap, collaborator failure, or cancellation.
pub const ABORTED: i32 = 3;

pub fn for_status(status: SessionStatus) -> i32 {
    match status {
        SessionStatus::Finished => OK,
        SessionStatus::PlanningFailed => PLANNING_FAILED,
        SessionStatus::Aborted => ABORTED,
    }
}
