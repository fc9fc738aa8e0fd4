use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use codeupdate_core::{UpdateConfig, UpdateError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fs_utils::{current_unix_timestamp, file_len_or_zero, remove_file_if_exists};
use crate::interrupt::Interrupt;
use crate::sidecar::{read_sidecar, sidecar_path, write_sidecar, DownloadMetadata};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub total_size: u64,
    // `ETag`, or `Last-Modified` when no entity tag is sent.
    pub validator: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest<'a> {
    pub url: &'a str,
    pub offset: u64,
    pub expected_size: u64,
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("request timed out")]
    Timeout,
    #[error("server responded with HTTP {status}")]
    Http { status: u16 },
    #[error("server did not report a content length")]
    MissingLength,
    #[error("interrupted")]
    Interrupted,
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to write download: {0}")]
    Io(#[from] io::Error),
}

pub trait Transport {
    fn probe(&self, url: &str, timeout: Duration) -> Result<RemoteMetadata, TransferError>;

    fn fetch_range(
        &self,
        request: &RangeRequest<'_>,
        sink: &mut dyn Write,
        on_chunk: &mut dyn FnMut(u64),
    ) -> Result<u64, TransferError>;
}

pub trait DownloadProgress {
    fn begin(&mut self, _total: u64, _offset: u64) {}
    fn advance(&mut self, _bytes_on_disk: u64) {}
    fn retry(&mut self, _attempt: u32, _max_attempts: u32, _error: &str) {}
    fn finish(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SilentProgress;

impl DownloadProgress for SilentProgress {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Pending,
    Probing,
    Transferring,
    Backoff,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    pub url: String,
    pub local_path: PathBuf,
    pub version: Option<String>,
    pub expected_size: Option<u64>,
    pub bytes_on_disk: u64,
    pub attempt: u32,
    pub max_attempts: u32,
    pub state: DownloadState,
}

impl DownloadSession {
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            url: url.into(),
            local_path: local_path.into(),
            version: None,
            expected_size: None,
            bytes_on_disk: 0,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            state: DownloadState::Pending,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub retry_delay: Duration,
    pub attempt_timeout: Duration,
    pub partial_threshold: u64,
}

impl DownloadPolicy {
    pub fn from_config(config: &UpdateConfig) -> Self {
        Self {
            retry_delay: config.retry_delay,
            attempt_timeout: config.download_timeout,
            partial_threshold: config.partial_threshold_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    CacheHit,
    Downloaded { resumed_from: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedDownload {
    pub path: PathBuf,
    pub size: u64,
    pub attempts: u32,
    pub outcome: DownloadOutcome,
}

pub struct DownloadManager {
    transport: Box<dyn Transport>,
    policy: DownloadPolicy,
    interrupt: Interrupt,
}

impl DownloadManager {
    pub fn new(transport: Box<dyn Transport>, policy: DownloadPolicy, interrupt: Interrupt) -> Self {
        Self {
            transport,
            policy,
            interrupt,
        }
    }

    pub fn fetch(
        &self,
        session: &mut DownloadSession,
        progress: &mut dyn DownloadProgress,
    ) -> Result<CompletedDownload, UpdateError> {
        let path = session.local_path.clone();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create download dir {}", parent.display()))?;
        }

        let existing = file_len_or_zero(&path)
            .with_context(|| format!("failed to inspect {}", path.display()))?;
        if existing > 0 && existing < self.policy.partial_threshold {
            info!(
                path = %path.display(),
                bytes = existing,
                threshold = self.policy.partial_threshold,
                "discarding partial download below resume threshold"
            );
            discard(&path)?;
        }

        let sidecar = sidecar_path(&path);
        let mut previous = match read_sidecar(&sidecar) {
            Ok(previous) => previous.map(Ok),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable download sidecar");
                Some(Err(()))
            }
        };

        let mut first_offset = None;
        let mut last_error = String::from("no attempt completed");

        while session.attempt < session.max_attempts {
            session.attempt += 1;
            self.interrupt.check()?;

            session.state = DownloadState::Probing;
            let remote = match self.transport.probe(&session.url, self.policy.attempt_timeout) {
                Ok(remote) if remote.total_size == 0 => {
                    last_error = "server reported an empty artifact".to_string();
                    self.backoff(session, progress, &last_error)?;
                    continue;
                }
                Ok(remote) => remote,
                Err(TransferError::Interrupted) => return Err(UpdateError::Interrupted),
                Err(err) => {
                    last_error = err.to_string();
                    self.backoff(session, progress, &last_error)?;
                    continue;
                }
            };
            let total = remote.total_size;

            if let Some(expected) = session.expected_size.filter(|expected| *expected != total) {
                warn!(
                    previous = expected,
                    current = total,
                    "remote size changed mid-session; restarting from zero"
                );
                discard(&path)?;
                session.bytes_on_disk = 0;
                first_offset = None;
            }
            session.expected_size = Some(total);

            let current = DownloadMetadata {
                version: session.version.clone(),
                url: session.url.clone(),
                expected_size: total,
                validator: remote.validator.clone(),
                captured_at_unix: current_unix_timestamp()?,
            };
            match previous.take() {
                Some(Ok(recorded)) if !recorded.matches(&current) => {
                    info!(path = %path.display(), "cached partial belongs to a different artifact; discarding");
                    discard(&path)?;
                }
                Some(Err(())) => discard(&path)?,
                _ => {}
            }
            write_sidecar(&sidecar, &current)?;

            let mut offset = file_len_or_zero(&path)
                .with_context(|| format!("failed to inspect {}", path.display()))?;
            if offset == total {
                session.bytes_on_disk = offset;
                session.state = DownloadState::Complete;
                let outcome = match first_offset {
                    Some(resumed_from) => DownloadOutcome::Downloaded { resumed_from },
                    None => {
                        info!(path = %path.display(), bytes = total, "cached artifact is complete");
                        DownloadOutcome::CacheHit
                    }
                };
                return Ok(CompletedDownload {
                    path,
                    size: total,
                    attempts: session.attempt,
                    outcome,
                });
            }
            if offset > total {
                warn!(bytes = offset, expected = total, "local file exceeds remote size; discarding");
                discard(&path)?;
                offset = 0;
            }
            session.bytes_on_disk = offset;
            first_offset.get_or_insert(offset);

            session.state = DownloadState::Transferring;
            debug!(attempt = session.attempt, offset, total, "requesting byte range");
            progress.begin(total, offset);
            let result = self.transfer(&session.url, &path, offset, total, progress);

            let persisted = file_len_or_zero(&path)
                .with_context(|| format!("failed to inspect {}", path.display()))?;
            session.bytes_on_disk = persisted;

            match result {
                Err(TransferError::Interrupted) => return Err(UpdateError::Interrupted),
                Err(err) => last_error = err.to_string(),
                Ok(_) if persisted < total => {
                    last_error = format!("transfer ended at {persisted} of {total} bytes");
                }
                Ok(_) => {}
            }

            if persisted == total {
                progress.finish();
                session.state = DownloadState::Complete;
                info!(
                    path = %path.display(),
                    bytes = total,
                    attempts = session.attempt,
                    "download complete"
                );
                return Ok(CompletedDownload {
                    path,
                    size: total,
                    attempts: session.attempt,
                    outcome: DownloadOutcome::Downloaded {
                        resumed_from: first_offset.unwrap_or(0),
                    },
                });
            }
            if persisted > total {
                last_error = format!("received {persisted} bytes but expected {total}");
                discard(&path)?;
                session.bytes_on_disk = 0;
                first_offset = None;
            }

            self.backoff(session, progress, &last_error)?;
        }

        session.state = DownloadState::Failed;
        Err(UpdateError::DownloadExhausted {
            attempts: session.attempt,
            last_error,
        })
    }

    fn transfer(
        &self,
        url: &str,
        path: &Path,
        offset: u64,
        total: u64,
        progress: &mut dyn DownloadProgress,
    ) -> Result<u64, TransferError> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let request = RangeRequest {
            url,
            offset,
            expected_size: total,
            timeout: self.policy.attempt_timeout,
        };

        let mut on_disk = offset;
        let mut on_chunk = |written: u64| {
            on_disk += written;
            progress.advance(on_disk);
        };
        let result = self.transport.fetch_range(&request, &mut file, &mut on_chunk);
        file.flush()?;
        file.sync_data()?;
        result
    }

    fn backoff(
        &self,
        session: &mut DownloadSession,
        progress: &mut dyn DownloadProgress,
        error: &str,
    ) -> Result<(), UpdateError> {
        warn!(
            attempt = session.attempt,
            max_attempts = session.max_attempts,
            error,
            "download attempt failed"
        );
        if session.attempt >= session.max_attempts {
            return Ok(());
        }
        progress.retry(session.attempt, session.max_attempts, error);
        session.state = DownloadState::Backoff;
        self.interrupt.sleep(self.policy.retry_delay)
    }
}

fn discard(path: &Path) -> Result<(), UpdateError> {
    remove_file_if_exists(path)
        .with_context(|| format!("failed to discard {}", path.display()))?;
    Ok(())
}
