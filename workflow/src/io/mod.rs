//! I/O helpers: configuration, external calls, prompts, and output files.

pub mod config;
pub mod invoker;
pub mod plan_store;
pub mod process;
pub mod prompt;
pub mod report;
pub mod scratch;
