use std::fs;
use std::io;

use anyhow::{bail, Result};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terminate => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }

    fn raw(self) -> libc::c_int {
        match self {
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pids: Vec<u32>,
}

impl ProcessSnapshot {
    pub fn new(mut pids: Vec<u32>) -> Self {
        pids.sort_unstable();
        pids.dedup();
        Self { pids }
    }

    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }
}

pub trait ProcessTable {
    fn snapshot(&self, process_name: &str) -> ProcessSnapshot;
    fn is_alive(&self, pid: u32) -> bool;
    fn signal(&self, pid: u32, signal: Signal) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SystemProcessTable {
    self_pid: u32,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            self_pid: std::process::id(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self, process_name: &str) -> ProcessSnapshot {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let pids = system
            .processes()
            .iter()
            .filter(|(_, process)| process.name() == process_name)
            .map(|(pid, _)| pid.as_u32())
            .filter(|pid| *pid != self.self_pid && !is_zombie(*pid))
            .collect();
        let snapshot = ProcessSnapshot::new(pids);
        trace!(process_name, pids = ?snapshot.pids(), "captured process snapshot");
        snapshot
    }

    fn is_alive(&self, pid: u32) -> bool {
        let Some(raw_pid) = checked_pid(pid) else {
            return false;
        };

        // SAFETY: signal 0 performs only the existence and permission check.
        let result = unsafe { libc::kill(raw_pid, 0) };
        let exists = result == 0
            || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
        exists && !is_zombie(pid)
    }

    fn signal(&self, pid: u32, signal: Signal) -> Result<()> {
        let Some(raw_pid) = checked_pid(pid) else {
            bail!("refusing to signal invalid pid {pid}");
        };

        // SAFETY: raw_pid is a positive, single-process id.
        let result = unsafe { libc::kill(raw_pid, signal.raw()) };
        if result == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        bail!("failed to send {} to pid {pid}: {err}", signal.as_str())
    }
}

// Zero and values beyond `i32::MAX` would address process groups.
fn checked_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|raw| *raw > 0)
}

fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    parse_proc_state(&stat) == Some('Z')
}

// State field of `/proc/<pid>/stat`; the command name may itself contain spaces or parens.
pub(crate) fn parse_proc_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}
