//! Process tree memory sampling
//!
//! Computes the aggregate resident memory of a root process and every descendant
//! visible at the moment of sampling. The tree is re-walked on every call since the
//! compiler may fork helpers (kpsewhich, mktextfm, ...) at any time.

use std::collections::{HashMap, HashSet};

use sysinfo::{Pid, ProcessRefreshKind, System};

/// One point-in-time reading of a process tree
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSample {
    /// Sum of RSS over `pids`, in bytes
    pub rss_bytes: u64,
    /// Root first, then descendants in discovery order
    pub pids: Vec<u32>,
}

/// Source of process tree samples
///
/// `None` means the root itself is gone. Descendants that disappear between
/// enumeration and reading are simply absent from the sample.
pub trait ResourceSampler: Send {
    fn sample(&mut self, root: u32) -> Option<ResourceSample>;
}

/// Sampler backed by the OS process table
pub struct ProcessTreeSampler {
    system: System,
}

impl ProcessTreeSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for ProcessTreeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for ProcessTreeSampler {
    fn sample(&mut self, root: u32) -> Option<ResourceSample> {
        self.system
            .refresh_processes_specifics(ProcessRefreshKind::new().with_memory());

        let processes = self.system.processes();

        // Threads show up in the table next to their process and share its memory
        let threads: HashSet<Pid> = processes
            .iter()
            .filter_map(|(pid, process)| process.tasks().map(|tasks| (pid, tasks)))
            .flat_map(|(pid, tasks)| tasks.iter().filter(move |tid| *tid != pid).copied())
            .collect();

        let entries = processes
            .iter()
            .filter(|(pid, _)| !threads.contains(pid))
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                parent: process.parent().map(|p| p.as_u32()),
                rss_bytes: process.memory(),
            });

        aggregate_tree(entries, root)
    }
}

/// Flattened process table row
#[derive(Debug, Clone, Copy)]
struct ProcessEntry {
    pid: u32,
    parent: Option<u32>,
    rss_bytes: u64,
}

/// Sum RSS over `root` and everything reachable from it through parent links
fn aggregate_tree(
    entries: impl IntoIterator<Item = ProcessEntry>,
    root: u32,
) -> Option<ResourceSample> {
    let mut rss_by_pid = HashMap::new();
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();

    for entry in entries {
        rss_by_pid.insert(entry.pid, entry.rss_bytes);
        if let Some(parent) = entry.parent {
            children.entry(parent).or_default().push(entry.pid);
        }
    }

    let root_rss = *rss_by_pid.get(&root)?;

    let mut sample = ResourceSample {
        rss_bytes: root_rss,
        pids: vec![root],
    };
    let mut seen = HashSet::from([root]);
    let mut cursor = 0;

    while cursor < sample.pids.len() {
        let pid = sample.pids[cursor];
        cursor += 1;

        for &child in children.get(&pid).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(child) {
                sample.rss_bytes = sample.rss_bytes.saturating_add(rss_by_pid[&child]);
                sample.pids.push(child);
            }
        }
    }

    Some(sample)
}
