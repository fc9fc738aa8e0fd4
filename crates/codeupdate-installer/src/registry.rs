use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::fs_utils::{is_confined_to, owned_by_current_user};
use crate::lock::read_lock_record;
use crate::process::{ProcessTable, Signal};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    TempFile(PathBuf),
    TempDir(PathBuf),
    BackgroundProcess(u32),
    LockFile(PathBuf),
}

impl ResourceHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TempFile(_) => "file",
            Self::TempDir(_) => "dir",
            Self::BackgroundProcess(_) => "process",
            Self::LockFile(_) => "lock",
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TempFile(path) | Self::TempDir(path) | Self::LockFile(path) => {
                write!(f, "{} {}", self.kind(), path.display())
            }
            Self::BackgroundProcess(pid) => write!(f, "process {pid}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownPolicy {
    pub process_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TeardownPolicy {
    fn default() -> Self {
        Self {
            process_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub terminated: Vec<u32>,
    pub killed: Vec<u32>,
    pub removed: Vec<PathBuf>,
    pub skipped: Vec<(ResourceHandle, String)>,
    pub failed: Vec<(ResourceHandle, String)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn skip(&mut self, handle: ResourceHandle, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(resource = %handle, %reason, "teardown skipped resource");
        self.skipped.push((handle, reason));
    }

    fn fail(&mut self, handle: ResourceHandle, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(resource = %handle, %reason, "teardown failed for resource");
        self.failed.push((handle, reason));
    }
}

const REAP_INTERVAL: Duration = Duration::from_millis(50);

type ReapedPids = Arc<Mutex<HashSet<u32>>>;

pub struct ResourceRegistry {
    handles: Vec<ResourceHandle>,
    scratch_roots: Vec<PathBuf>,
    policy: TeardownPolicy,
    processes: Rc<dyn ProcessTable>,
    reaped: ReapedPids,
    owner_pid: u32,
    torn_down: bool,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("handles", &self.handles)
            .field("scratch_roots", &self.scratch_roots)
            .field("policy", &self.policy)
            .field("owner_pid", &self.owner_pid)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

impl ResourceRegistry {
    pub fn new(scratch_roots: Vec<PathBuf>, processes: Rc<dyn ProcessTable>) -> Self {
        Self {
            handles: Vec::new(),
            scratch_roots,
            policy: TeardownPolicy::default(),
            processes,
            reaped: ReapedPids::default(),
            owner_pid: std::process::id(),
            torn_down: false,
        }
    }

    pub fn with_policy(mut self, policy: TeardownPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_owner_pid(mut self, owner_pid: u32) -> Self {
        self.owner_pid = owner_pid;
        self
    }

    pub fn owner_pid(&self) -> u32 {
        self.owner_pid
    }

    pub fn handles(&self) -> &[ResourceHandle] {
        &self.handles
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn register_file(&mut self, path: impl Into<PathBuf>) {
        self.register(ResourceHandle::TempFile(path.into()));
    }

    pub fn register_dir(&mut self, path: impl Into<PathBuf>) {
        self.register(ResourceHandle::TempDir(path.into()));
    }

    pub fn register_process(&mut self, pid: u32) {
        self.register(ResourceHandle::BackgroundProcess(pid));
    }

    // Registers a spawned child and reaps it on a detached thread. Once reaped, its PID
    // is never signalled again, since the kernel may have handed it to another process.
    pub fn register_child(&mut self, mut child: Child) {
        let pid = child.id();
        self.register_process(pid);

        let reaped = Arc::clone(&self.reaped);
        std::thread::spawn(move || loop {
            let mut exited = lock_reaped(&reaped);
            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(_)) | Err(_) => {
                    exited.insert(pid);
                    return;
                }
            }
            drop(exited);
            std::thread::sleep(REAP_INTERVAL);
        });
    }

    #[cfg(test)]
    pub(crate) fn is_reaped(&self, pid: u32) -> bool {
        lock_reaped(&self.reaped).contains(&pid)
    }

    pub fn register_lock(&mut self, path: impl Into<PathBuf>) {
        self.register(ResourceHandle::LockFile(path.into()));
    }

    pub fn register(&mut self, handle: ResourceHandle) {
        if self.torn_down {
            warn!(resource = %handle, "resource registered after teardown; releasing immediately");
            self.release(vec![handle]);
            return;
        }
        if self.handles.contains(&handle) {
            return;
        }
        debug!(resource = %handle, "registered resource");
        self.handles.push(handle);
    }

    pub fn teardown(&mut self) -> TeardownReport {
        if self.torn_down {
            debug!("teardown already completed; nothing to do");
            return TeardownReport::default();
        }
        self.torn_down = true;

        let handles = std::mem::take(&mut self.handles);
        let report = self.release(handles);
        info!(
            terminated = report.terminated.len(),
            killed = report.killed.len(),
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "teardown complete"
        );
        report
    }

    fn release(&self, handles: Vec<ResourceHandle>) -> TeardownReport {
        let mut report = TeardownReport::default();
        let mut pids = Vec::new();
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut locks = Vec::new();
        for handle in handles {
            match handle {
                ResourceHandle::BackgroundProcess(pid) => pids.push(pid),
                ResourceHandle::TempFile(path) => files.push(path),
                ResourceHandle::TempDir(path) => dirs.push(path),
                ResourceHandle::LockFile(path) => locks.push(path),
            }
        }

        self.stop_processes(&pids, &mut report);
        for path in files {
            self.remove_file(path, &mut report);
        }
        // Nested directories are registered after their parents.
        for path in dirs.into_iter().rev() {
            self.remove_dir(path, &mut report);
        }
        for path in locks {
            self.remove_lock(path, &mut report);
        }
        report
    }

    fn stop_processes(&self, pids: &[u32], report: &mut TeardownReport) {
        // Held until the last signal: a child cannot be reaped, nor its PID reused, meanwhile.
        let reaped = lock_reaped(&self.reaped);
        let mut signalled = Vec::new();
        for &pid in pids {
            if reaped.contains(&pid) {
                debug!(pid, "background process already reaped");
                continue;
            }
            if !self.processes.is_alive(pid) {
                debug!(pid, "background process already exited");
                continue;
            }
            match self.processes.signal(pid, Signal::Terminate) {
                Ok(()) => {
                    report.terminated.push(pid);
                    signalled.push(pid);
                }
                Err(err) => report.fail(ResourceHandle::BackgroundProcess(pid), err.to_string()),
            }
        }

        let survivors = self.wait_for_exit(&signalled);
        let mut killed = Vec::new();
        for pid in survivors {
            match self.processes.signal(pid, Signal::Kill) {
                Ok(()) => {
                    report.killed.push(pid);
                    killed.push(pid);
                }
                Err(err) => report.fail(ResourceHandle::BackgroundProcess(pid), err.to_string()),
            }
        }

        for pid in self.wait_for_exit(&killed) {
            report.fail(
                ResourceHandle::BackgroundProcess(pid),
                "process survived SIGKILL",
            );
        }
    }

    fn wait_for_exit(&self, pids: &[u32]) -> Vec<u32> {
        let deadline = Instant::now() + self.policy.process_timeout;
        loop {
            let alive = pids
                .iter()
                .copied()
                .filter(|pid| self.processes.is_alive(*pid))
                .collect::<Vec<_>>();
            if alive.is_empty() || Instant::now() >= deadline {
                return alive;
            }
            std::thread::sleep(self.policy.poll_interval);
        }
    }

    fn remove_file(&self, path: PathBuf, report: &mut TeardownReport) {
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => return report.fail(ResourceHandle::TempFile(path), err.to_string()),
        };
        if metadata.is_dir() {
            return report.skip(
                ResourceHandle::TempFile(path),
                "expected a file but found a directory",
            );
        }
        if !is_owned(&path) {
            return report.skip(ResourceHandle::TempFile(path), "not owned by current user");
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed file");
                report.removed.push(path);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => report.fail(ResourceHandle::TempFile(path), err.to_string()),
        }
    }

    fn remove_dir(&self, path: PathBuf, report: &mut TeardownReport) {
        if !is_confined_to(&path, &self.scratch_roots) {
            return report.skip(ResourceHandle::TempDir(path), "outside the scratch roots");
        }
        let metadata = match fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return,
            Err(err) => return report.fail(ResourceHandle::TempDir(path), err.to_string()),
        };
        if !metadata.is_dir() {
            return report.skip(ResourceHandle::TempDir(path), "not a directory");
        }
        if !is_owned(&path) {
            return report.skip(ResourceHandle::TempDir(path), "not owned by current user");
        }

        match fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed directory");
                report.removed.push(path);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => report.fail(ResourceHandle::TempDir(path), err.to_string()),
        }
    }

    fn remove_lock(&self, path: PathBuf, report: &mut TeardownReport) {
        let record = match read_lock_record(&path) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => return report.fail(ResourceHandle::LockFile(path), format!("{err:#}")),
        };
        if record.owner_pid != Some(self.owner_pid) {
            let owner = record
                .owner_pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return report.skip(
                ResourceHandle::LockFile(path),
                format!("lock is owned by pid {owner}"),
            );
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "released lock");
                report.removed.push(path);
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => report.fail(ResourceHandle::LockFile(path), err.to_string()),
        }
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        if !self.torn_down {
            self.teardown();
        }
    }
}

fn lock_reaped(reaped: &ReapedPids) -> MutexGuard<'_, HashSet<u32>> {
    reaped.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_owned(path: &Path) -> bool {
    owned_by_current_user(path).unwrap_or(false)
}
