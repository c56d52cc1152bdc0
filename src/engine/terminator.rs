//! Process tree termination
//!
//! Best-effort SIGKILL of a supervised process, its process group and any
//! descendants observed by the caller, followed by a bounded reap of the root.

use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tracing::{debug, warn};

/// How long to wait for the root to be reaped after SIGKILL
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Kill `child` and `descendants`, then wait for the child to be reaped
///
/// Calling this on a child that has already been reaped is a no-op. Processes
/// that are already gone are ignored.
pub async fn terminate(child: &mut Child, descendants: &[u32]) {
    let Some(root) = child.id() else {
        debug!("terminate: child already reaped");
        return;
    };

    // The root leads its own group, so the group id is the root pid.
    // Signal before reaping so none of these pids can have been recycled.
    kill_group(root);

    for &pid in descendants.iter().filter(|&&pid| pid != root) {
        send_kill(pid, kill(to_pid(pid), Signal::SIGKILL), "descendant");
    }

    if let Err(e) = child.start_kill() {
        debug!("start_kill on {} failed: {}", root, e);
    }

    match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => debug!("Reaped process {} ({})", root, status),
        Ok(Err(e)) => warn!("Failed to reap process {}: {}", root, e),
        Err(_) => warn!(
            "Process {} not reaped within {:?} after SIGKILL",
            root, REAP_TIMEOUT
        ),
    }
}

/// Synchronous SIGKILL of the group led by `leader`
pub fn kill_group(leader: u32) {
    send_kill(leader, killpg(to_pid(leader), Signal::SIGKILL), "process group");
}

fn send_kill(pid: u32, result: nix::Result<()>, what: &str) {
    match result {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill {} {}: {}", what, pid, e),
    }
}

fn to_pid(pid: u32) -> Pid {
    Pid::from_raw(pid as i32)
}
