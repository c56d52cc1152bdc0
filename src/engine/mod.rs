//! Engine module - Bounded process execution
//!
//! This module runs an untrusted external command under resource ceilings:
//! - `sampler`: aggregate RSS of a process tree
//! - `terminator`: SIGKILL of a process tree and reaping of its root
//! - `supervisor`: spawn + poll loop deciding the `ExecutionOutcome`
//!
//! The engine module does NOT:
//! - Know about LaTeX, passes or artifacts
//! - Interpret exit codes beyond reporting them

pub mod sampler;
pub mod supervisor;
pub mod terminator;

// Re-exports for convenience
pub use supervisor::{ExecutionOutcome, ExecutionRequest, Supervisor};
