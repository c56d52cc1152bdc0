//! Bounded execution supervisor
//!
//! Runs one external command under a wall-clock deadline and a memory ceiling.
//! Exit detection, the deadline and the memory check all happen in a single poll
//! loop; each tick produces a `Tick` and the first terminal one decides the
//! `ExecutionOutcome`.

use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::sampler::{ProcessTreeSampler, ResourceSampler};
use super::terminator;

/// Everything needed to run one bounded command
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Working directory of the child
    pub work_dir: PathBuf,
    /// File receiving combined stdout and stderr (truncated on start)
    pub output_path: PathBuf,
    /// Wall-clock deadline
    pub timeout: Duration,
    /// Aggregate RSS ceiling for the whole process tree, in bytes
    pub memory_limit_bytes: u64,
    /// Poll cadence
    pub sample_interval: Duration,
}

/// Terminal result of one supervised execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Process exited on its own (-1 when killed by a signal we did not send)
    Completed { exit_code: i32, output_path: PathBuf },
    /// Deadline reached, tree killed
    TimedOut,
    /// Aggregate RSS went over the ceiling, tree killed
    MemoryExceeded { observed_bytes: u64 },
    /// Root disappeared from the process table without an observed exit
    ProcessVanished,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { exit_code: 0, .. })
    }
}

/// What one poll tick observed
#[derive(Debug)]
enum Tick {
    Running,
    Exited(i32),
    DeadlineReached,
    Vanished,
    OverMemory(u64),
}

/// A spawned child and the pid it was started with
struct ProcessHandle {
    child: Child,
    pid: u32,
}

impl Drop for ProcessHandle {
    /// Kill the whole group if `run` is abandoned before the child is reaped
    fn drop(&mut self) {
        // An unreaped child keeps its pid, so the group id cannot have been recycled
        if self.child.id().is_some() {
            debug!("Dropping live process {}, killing its group", self.pid);
            terminator::kill_group(self.pid);
        }
    }
}

/// Supervisor for a single execution at a time
///
/// Holds its own sampler, so concurrent executions each need their own instance.
pub struct Supervisor<S = ProcessTreeSampler> {
    sampler: S,
}

impl Supervisor<ProcessTreeSampler> {
    pub fn new() -> Self {
        Self::with_sampler(ProcessTreeSampler::new())
    }
}

impl Default for Supervisor<ProcessTreeSampler> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ResourceSampler> Supervisor<S> {
    pub fn with_sampler(sampler: S) -> Self {
        Self { sampler }
    }

    /// Run the command until it exits or a limit fires
    ///
    /// Returns `Err` only when the environment fails (sink not creatable, spawn
    /// failure, wait failure). In every case the process has been reaped by the
    /// time this returns.
    pub async fn run(&mut self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let mut handle = spawn(request)?;
        let started = Instant::now();

        info!(
            "Spawned {} (pid {}) timeout={:?} memory_limit={}B",
            request.program, handle.pid, request.timeout, request.memory_limit_bytes
        );

        let outcome = loop {
            let tick = match self.observe(&mut handle, started, request) {
                Ok(tick) => tick,
                Err(e) => {
                    self.terminate_tree(&mut handle).await;
                    return Err(e);
                }
            };

            match tick {
                Tick::Running => {
                    let remaining = request.timeout.saturating_sub(started.elapsed());
                    tokio::time::sleep(request.sample_interval.min(remaining)).await;
                }
                Tick::Exited(exit_code) => {
                    break ExecutionOutcome::Completed {
                        exit_code,
                        output_path: request.output_path.clone(),
                    };
                }
                Tick::DeadlineReached => {
                    warn!(
                        "Process {} exceeded deadline of {:?}, killing tree",
                        handle.pid, request.timeout
                    );
                    self.terminate_tree(&mut handle).await;
                    break ExecutionOutcome::TimedOut;
                }
                Tick::Vanished => {
                    warn!("Process {} vanished without an observed exit", handle.pid);
                    terminator::terminate(&mut handle.child, &[]).await;
                    break ExecutionOutcome::ProcessVanished;
                }
                Tick::OverMemory(observed_bytes) => {
                    warn!(
                        "Process tree {} uses {}B, over limit of {}B, killing tree",
                        handle.pid, observed_bytes, request.memory_limit_bytes
                    );
                    self.terminate_tree(&mut handle).await;
                    break ExecutionOutcome::MemoryExceeded { observed_bytes };
                }
            }
        };

        debug!(
            "Process {} finished after {:?}: {:?}",
            handle.pid,
            started.elapsed(),
            outcome
        );

        Ok(outcome)
    }

    /// One poll: exit first, then deadline, then memory
    fn observe(
        &mut self,
        handle: &mut ProcessHandle,
        started: Instant,
        request: &ExecutionRequest,
    ) -> Result<Tick> {
        if let Some(status) = handle
            .child
            .try_wait()
            .with_context(|| format!("Failed to poll process {}", handle.pid))?
        {
            return Ok(Tick::Exited(status.code().unwrap_or(-1)));
        }

        if started.elapsed() >= request.timeout {
            return Ok(Tick::DeadlineReached);
        }

        let tick = match self.sampler.sample(handle.pid) {
            None => Tick::Vanished,
            Some(sample) if sample.rss_bytes > request.memory_limit_bytes => {
                Tick::OverMemory(sample.rss_bytes)
            }
            Some(_) => Tick::Running,
        };
        Ok(tick)
    }

    /// Kill the root, its group and whatever descendants are visible right now
    async fn terminate_tree(&mut self, handle: &mut ProcessHandle) {
        let descendants = self
            .sampler
            .sample(handle.pid)
            .map(|sample| sample.pids)
            .unwrap_or_default();
        terminator::terminate(&mut handle.child, &descendants).await;
    }
}

/// Start the command with stdout and stderr going to the same file
fn spawn(request: &ExecutionRequest) -> Result<ProcessHandle> {
    let sink = File::create(&request.output_path)
        .with_context(|| format!("Failed to create output sink {:?}", request.output_path))?;
    let sink_err = sink
        .try_clone()
        .context("Failed to duplicate output sink handle")?;

    debug!(
        "Running {} with args: {:?} in {:?}",
        request.program, request.args, request.work_dir
    );

    let child = Command::new(&request.program)
        .args(&request.args)
        .current_dir(&request.work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(sink))
        .stderr(Stdio::from(sink_err))
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn {}", request.program))?;

    let pid = child.id().context("Spawned process has no pid")?;

    Ok(ProcessHandle { child, pid })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sampler::ResourceSample;
    use std::path::Path;

    fn shell_request(dir: &Path, script: &str) -> ExecutionRequest {
        ExecutionRequest {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            work_dir: dir.to_path_buf(),
            output_path: dir.join("output.txt"),
            timeout: Duration::from_secs(10),
            memory_limit_bytes: 1024 * 1024 * 1024,
            sample_interval: Duration::from_millis(20),
        }
    }

    /// Sampler that reports a fixed reading for any root
    struct FixedSampler(Option<u64>);

    impl ResourceSampler for FixedSampler {
        fn sample(&mut self, root: u32) -> Option<ResourceSample> {
            self.0.map(|rss_bytes| ResourceSample {
                rss_bytes,
                pids: vec![root],
            })
        }
    }

    /// Whether a pid still names a live (non-zombie) process
    fn is_alive(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.split_whitespace().next())
                .map(|state| state != "Z" && state != "X")
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_completed_captures_combined_output() {
        let dir = tempfile::tempdir().unwrap();
        let request = shell_request(dir.path(), "echo out; echo err >&2; exit 3");

        let outcome = Supervisor::new().run(&request).await.unwrap();

        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                exit_code: 3,
                output_path: dir.path().join("output.txt"),
            }
        );
        let captured = std::fs::read_to_string(dir.path().join("output.txt")).unwrap();
        assert!(captured.contains("out"));
        assert!(captured.contains("err"));
    }

    #[tokio::test]
    async fn test_verbose_child_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        // Far more than a pipe buffer holds
        let request = shell_request(
            dir.path(),
            "i=0; while [ $i -lt 20000 ]; do echo line $i; i=$((i+1)); done",
        );

        let outcome = Supervisor::new().run(&request).await.unwrap();

        assert!(outcome.is_success());
        let captured = std::fs::read_to_string(dir.path().join("output.txt")).unwrap();
        assert_eq!(captured.lines().count(), 20000);
    }

    #[tokio::test]
    async fn test_timeout_kills_whole_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = shell_request(dir.path(), "sleep 30 & echo $! > child.pid; wait");
        request.timeout = Duration::from_millis(300);

        let started = Instant::now();
        let outcome = Supervisor::new().run(&request).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(5));

        let child_pid: u32 = std::fs::read_to_string(dir.path().join("child.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..50 {
            alive = is_alive(child_pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "grandchild {} survived the timeout", child_pid);
    }

    #[tokio::test]
    async fn test_memory_ceiling_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = shell_request(dir.path(), "sleep 30");
        // Any real process is over a single page
        request.memory_limit_bytes = 4096;

        let started = Instant::now();
        let outcome = Supervisor::new().run(&request).await.unwrap();

        match outcome {
            ExecutionOutcome::MemoryExceeded { observed_bytes } => assert!(observed_bytes > 4096),
            other => panic!("expected MemoryExceeded, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_descendant_allocation_hits_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        // The shell stays small; `tail` buffers 300 MB before writing anything
        let mut request = shell_request(
            dir.path(),
            "head -c 300000000 /dev/zero | tail -c 300000000 >/dev/null; sleep 5",
        );
        request.memory_limit_bytes = 100 * 1024 * 1024;
        request.sample_interval = Duration::from_millis(100);

        let started = Instant::now();
        let outcome = Supervisor::new().run(&request).await.unwrap();

        match outcome {
            ExecutionOutcome::MemoryExceeded { observed_bytes } => {
                assert!(observed_bytes > 100 * 1024 * 1024)
            }
            other => panic!("expected MemoryExceeded, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_abandoned_run_kills_whole_tree() {
        let dir = tempfile::tempdir().unwrap();
        let request = shell_request(dir.path(), "sleep 30 & echo $! > child.pid; wait");

        let mut supervisor = Supervisor::new();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(300), supervisor.run(&request)).await;
        assert!(abandoned.is_err());

        let child_pid: u32 = std::fs::read_to_string(dir.path().join("child.pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..50 {
            alive = is_alive(child_pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "grandchild {} survived the dropped run", child_pid);
    }

    #[tokio::test]
    async fn test_deadline_wins_over_memory_in_same_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = shell_request(dir.path(), "sleep 30");
        request.timeout = Duration::ZERO;
        request.memory_limit_bytes = 1;

        let mut supervisor = Supervisor::with_sampler(FixedSampler(Some(u64::MAX)));
        let outcome = supervisor.run(&request).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_vanished_root() {
        let dir = tempfile::tempdir().unwrap();
        let request = shell_request(dir.path(), "sleep 30");

        let mut supervisor = Supervisor::with_sampler(FixedSampler(None));
        let outcome = supervisor.run(&request).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::ProcessVanished);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_under_ceiling_completes() {
        let dir = tempfile::tempdir().unwrap();
        let request = shell_request(dir.path(), "sleep 0.2; echo done");

        let mut supervisor = Supervisor::with_sampler(FixedSampler(Some(1024)));
        let outcome = supervisor.run(&request).await.unwrap();

        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = shell_request(dir.path(), "");
        request.program = "/nonexistent/texd-compiler".to_string();

        let err = Supervisor::new().run(&request).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }
}
