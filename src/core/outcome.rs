use std::fmt;

/// Final result of compiling one document
#[derive(Debug, Clone, PartialEq)]
pub enum CompilationResult {
    /// Final pass exited cleanly and produced an artifact within the size ceiling
    Success { artifact: Vec<u8> },
    /// Anything else; `diagnostics` holds at most 10 lines mined from the log
    Failure {
        reason: FailureReason,
        diagnostics: Vec<String>,
    },
}

impl CompilationResult {
    pub fn failure(reason: FailureReason) -> Self {
        CompilationResult::Failure {
            reason,
            diagnostics: Vec::new(),
        }
    }
}

/// Why a compilation did not produce a usable artifact
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Timeout,
    MemoryLimit { observed_bytes: u64 },
    ArtifactTooLarge { size: u64 },
    /// Non-zero exit, missing artifact or a vanished compiler process
    CompilationError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Timeout => "timeout",
            FailureReason::MemoryLimit { .. } => "memory_limit",
            FailureReason::ArtifactTooLarge { .. } => "artifact_too_large",
            FailureReason::CompilationError => "compilation_error",
        };
        write!(f, "{}", s)
    }
}
