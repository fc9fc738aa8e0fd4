use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use codeupdate_core::UpdateError;
use tracing::{debug, info, warn};

use crate::fs_utils::{current_unix_timestamp, remove_file_if_exists};
use crate::process::ProcessTable;
use crate::registry::ResourceRegistry;

const MAX_ACQUIRE_ROUNDS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub path: PathBuf,
    pub owner_pid: Option<u32>,
    pub acquired_at_unix: Option<u64>,
}

impl LockRecord {
    pub fn parse(path: &Path, raw: &str) -> Self {
        let mut owner_pid = None;
        let mut acquired_at_unix = None;

        for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
            match line.split_once('=') {
                Some(("pid", value)) => owner_pid = value.trim().parse::<u32>().ok(),
                Some(("acquired_at_unix", value)) => {
                    acquired_at_unix = value.trim().parse::<u64>().ok()
                }
                Some(_) => {}
                None if owner_pid.is_none() => owner_pid = line.parse::<u32>().ok(),
                None => {}
            }
        }

        Self {
            path: path.to_path_buf(),
            owner_pid: owner_pid.filter(|pid| *pid > 0),
            acquired_at_unix,
        }
    }

    pub fn serialize(&self) -> String {
        let mut lines = Vec::new();
        if let Some(pid) = self.owner_pid {
            lines.push(format!("pid={pid}"));
        }
        if let Some(acquired_at) = self.acquired_at_unix {
            lines.push(format!("acquired_at_unix={acquired_at}"));
        }
        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}

pub fn read_lock_record(path: &Path) -> Result<Option<LockRecord>> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(LockRecord::parse(path, &raw))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read lock file {}", path.display())),
    }
}

pub struct ConcurrencyGuard {
    processes: Rc<dyn ProcessTable>,
    owner_pid: u32,
}

impl ConcurrencyGuard {
    pub fn new(processes: Rc<dyn ProcessTable>) -> Self {
        Self {
            processes,
            owner_pid: std::process::id(),
        }
    }

    pub fn with_owner_pid(mut self, owner_pid: u32) -> Self {
        self.owner_pid = owner_pid;
        self
    }

    pub fn acquire(
        &self,
        lock_path: &Path,
        registry: &mut ResourceRegistry,
    ) -> Result<LockRecord, UpdateError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create lock dir {}", parent.display()))?;
        }

        let mut last_seen = None;
        for round in 1..=MAX_ACQUIRE_ROUNDS {
            match self.try_create(lock_path)? {
                Some(record) => {
                    registry.register_lock(lock_path);
                    info!(
                        lock = %lock_path.display(),
                        pid = self.owner_pid,
                        "acquired update lock"
                    );
                    return Ok(record);
                }
                None => {
                    let existing = read_lock_record(lock_path)?;
                    let Some(existing) = existing else {
                        debug!(round, "lock vanished before it could be read; retrying");
                        continue;
                    };

                    if let Some(pid) = existing.owner_pid {
                        if pid != self.owner_pid && self.processes.is_alive(pid) {
                            return Err(UpdateError::AlreadyRunning {
                                pid,
                                lock_path: lock_path.to_path_buf(),
                            });
                        }
                    }

                    warn!(
                        lock = %lock_path.display(),
                        owner = ?existing.owner_pid,
                        round,
                        "reclaiming stale update lock"
                    );
                    remove_file_if_exists(lock_path).with_context(|| {
                        format!("failed to remove stale lock {}", lock_path.display())
                    })?;
                    last_seen = existing.owner_pid;
                }
            }
        }

        Err(anyhow::anyhow!(
            "could not acquire lock {} after {MAX_ACQUIRE_ROUNDS} attempts (last owner: {})",
            lock_path.display(),
            last_seen
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        )
        .into())
    }

    fn try_create(&self, lock_path: &Path) -> Result<Option<LockRecord>> {
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to create lock {}", lock_path.display()))
            }
        };

        let record = LockRecord {
            path: lock_path.to_path_buf(),
            owner_pid: Some(self.owner_pid),
            acquired_at_unix: Some(current_unix_timestamp()?),
        };
        if let Err(err) = file
            .write_all(record.serialize().as_bytes())
            .and_then(|()| file.sync_all())
        {
            drop(file);
            let _ = remove_file_if_exists(lock_path);
            return Err(err).with_context(|| format!("failed to write lock {}", lock_path.display()));
        }
        Ok(Some(record))
    }
}
