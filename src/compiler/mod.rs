//! Compiler module - Multi-pass LaTeX compilation
//!
//! Drives the external typesetter through the bounded supervisor:
//! - runs up to `passes` passes over the same working directory
//! - stops at the first pass that is not a clean exit
//! - picks up the PDF or mines the captured output for diagnostics
//!
//! The compiler module does NOT:
//! - Validate or stage the source (that's the HTTP layer's job)
//! - Spawn, sample or kill processes itself

pub mod diagnostics;

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::config::CompilerConfig;
use crate::core::{CompilationResult, FailureReason};
use crate::engine::{ExecutionOutcome, ExecutionRequest, Supervisor};

/// Base name shared by the staged source, the log and the PDF
pub const DOCUMENT_STEM: &str = "document";

/// File in the working directory receiving the compiler's stdout/stderr
pub const OUTPUT_FILE: &str = "compiler.out";

/// Compiles a staged document into a PDF
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// Compile `source`, writing every intermediate file into `work_dir`
    ///
    /// Content failures come back as `CompilationResult::Failure`; `Err` means the
    /// environment is broken (compiler missing, working directory unusable).
    async fn compile(&self, source: &Path, work_dir: &Path) -> Result<CompilationResult>;
}

/// `pdflatex`-style compiler run under the bounded supervisor
pub struct LatexCompiler {
    config: CompilerConfig,
}

impl LatexCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    /// Build the supervisor request for one pass
    fn pass_request(&self, source: &Path, work_dir: &Path) -> ExecutionRequest {
        ExecutionRequest {
            program: self.config.program.clone(),
            args: vec![
                "-no-shell-escape".to_string(),
                "-interaction=nonstopmode".to_string(),
                "-output-directory".to_string(),
                work_dir.to_string_lossy().into_owned(),
                source.to_string_lossy().into_owned(),
            ],
            work_dir: work_dir.to_path_buf(),
            output_path: work_dir.join(OUTPUT_FILE),
            timeout: self.config.timeout,
            memory_limit_bytes: self.config.memory_limit_bytes,
            sample_interval: self.config.sample_interval,
        }
    }

    /// Run passes until one is not a clean exit; returns the last outcome
    async fn run_passes(&self, source: &Path, work_dir: &Path) -> Result<ExecutionOutcome> {
        let request = self.pass_request(source, work_dir);
        let mut supervisor = Supervisor::new();
        let mut pass = 1;

        loop {
            let outcome = supervisor
                .run(&request)
                .await
                .with_context(|| format!("Compiler pass {} could not be run", pass))?;

            info!(
                "Pass {}/{} of {:?} finished: {:?}",
                pass, self.config.passes, source, outcome
            );

            if !outcome.is_success() || pass >= self.config.passes {
                return Ok(outcome);
            }
            pass += 1;
        }
    }

    /// Read the PDF unless it is missing or over the size ceiling
    async fn collect_artifact(&self, artifact_path: &Path) -> Result<Option<CompilationResult>> {
        let metadata = match tokio::fs::metadata(artifact_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No artifact at {:?}", artifact_path);
                return Ok(None);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to stat {:?}", artifact_path))
            }
        };

        let size = metadata.len();
        if size > self.config.max_artifact_bytes {
            warn!(
                "Artifact {:?} is {}B, over limit of {}B",
                artifact_path, size, self.config.max_artifact_bytes
            );
            return Ok(Some(CompilationResult::failure(
                FailureReason::ArtifactTooLarge { size },
            )));
        }

        let artifact = tokio::fs::read(artifact_path)
            .await
            .with_context(|| format!("Failed to read {:?}", artifact_path))?;

        Ok(Some(CompilationResult::Success { artifact }))
    }

    /// Read at most `max_log_bytes` of the captured compiler output
    async fn read_log(&self, output_path: &Path) -> String {
        let file = match tokio::fs::File::open(output_path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to open compiler output {:?}: {}", output_path, e);
                return String::new();
            }
        };

        let mut buf = Vec::new();
        if let Err(e) = file
            .take(self.config.max_log_bytes)
            .read_to_end(&mut buf)
            .await
        {
            warn!("Failed to read compiler output {:?}: {}", output_path, e);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

#[async_trait]
impl DocumentCompiler for LatexCompiler {
    async fn compile(&self, source: &Path, work_dir: &Path) -> Result<CompilationResult> {
        let outcome = self.run_passes(source, work_dir).await?;

        let output_path = match outcome {
            ExecutionOutcome::TimedOut => {
                return Ok(CompilationResult::failure(FailureReason::Timeout))
            }
            ExecutionOutcome::MemoryExceeded { observed_bytes } => {
                return Ok(CompilationResult::failure(FailureReason::MemoryLimit {
                    observed_bytes,
                }))
            }
            ExecutionOutcome::ProcessVanished => {
                return Ok(CompilationResult::failure(FailureReason::CompilationError))
            }
            ExecutionOutcome::Completed {
                exit_code: 0,
                output_path,
            } => {
                let artifact = artifact_path(source, work_dir);
                if let Some(result) = self.collect_artifact(&artifact).await? {
                    return Ok(result);
                }
                output_path
            }
            ExecutionOutcome::Completed { output_path, .. } => output_path,
        };

        let log = self.read_log(&output_path).await;
        Ok(CompilationResult::Failure {
            reason: FailureReason::CompilationError,
            diagnostics: diagnostics::extract(&log),
        })
    }
}

/// `<work_dir>/<source stem>.pdf`
fn artifact_path(source: &Path, work_dir: &Path) -> PathBuf {
    let mut name = source
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| DOCUMENT_STEM.into());
    name.push(".pdf");
    work_dir.join(name)
}
