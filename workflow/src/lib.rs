//! Produce/critique workflow engine.
//!
//! A request is planned by a convergence loop (planner drafts, reviewer
//! critiques) into ordered stages with success criteria. Each stage then runs
//! its own convergence loop, is checked against its criteria, and is followed
//! by a reflection step that may rewrite the remaining queue. Every call reads
//! from and appends to a bounded, compacting event log.
//!
//! - **[`core`]**: Pure, deterministic logic (decision normalizer, stagnation,
//!   repetition guard, plan invariants, queue updates). No I/O.
//! - **[`io`]**: Side-effecting operations (config, external processes,
//!   prompts, reports, scratch directories).
//! - **[`agents`]**: Role adapters over one external generation program.
//!
//! [`convergence`], [`orchestrator`], and [`session`] tie them together.

pub mod agents;
pub mod cancel;
pub mod collaborators;
pub mod convergence;
pub mod core;
pub mod error;
pub mod events;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
