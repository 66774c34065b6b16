//! Deterministic, pure logic shared by the workflow engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod decision;
pub mod invariants;
pub mod queue;
pub mod repetition;
pub mod similarity;
pub mod stagnation;
pub mod types;
