pub mod outcome;

pub use outcome::{CompilationResult, FailureReason};
