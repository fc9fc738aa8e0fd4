use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_INTERRUPTED: u8 = 130;

/// Startup problems; always reported before any resource exists.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid edition '{0}'; supported: stable, insiders")]
    InvalidEdition(String),
    #[error("unsupported architecture '{0}'; supported: x64, arm64, armhf")]
    UnsupportedArch(String),
    #[error("no supported package manager found on PATH (looked for: {0})")]
    NoPackageManager(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {message}")]
    ParseConfig { path: PathBuf, message: String },
    #[error("self-check failed: {0}")]
    SelfCheck(String),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("another update run is already in progress (pid {pid}, lock {})", lock_path.display())]
    AlreadyRunning { pid: u32, lock_path: PathBuf },
    #[error("{process} is still running after forced termination (pids: {})", format_pids(pids))]
    Unkillable { process: String, pids: Vec<u32> },
    #[error("aborted: {0}")]
    Aborted(String),
    #[error("download failed after {attempts} attempt(s): {last_error}")]
    DownloadExhausted { attempts: u32, last_error: String },
    #[error("artifact verification failed: {0}")]
    Verification(String),
    #[error("package installation failed: {0}")]
    Install(String),
    #[error("interrupted")]
    Interrupted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UpdateError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Interrupted => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

fn format_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    DetectSystem,
    AcquireLock,
    CheckVersion,
    CheckTargetProcess,
    Backup,
    Download,
    VerifyArtifact,
    Install,
    ReportSuccess,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DetectSystem => "detect-system",
            Self::AcquireLock => "acquire-lock",
            Self::CheckVersion => "check-version",
            Self::CheckTargetProcess => "check-target-process",
            Self::Backup => "backup",
            Self::Download => "download",
            Self::VerifyArtifact => "verify-artifact",
            Self::Install => "install",
            Self::ReportSuccess => "report-success",
        }
    }

    pub fn is_optional(self) -> bool {
        matches!(self, Self::CheckVersion | Self::Backup)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{phase} phase failed: {source}")]
pub struct PhaseError {
    pub phase: Phase,
    #[source]
    pub source: UpdateError,
}

impl PhaseError {
    pub fn new(phase: Phase, source: impl Into<UpdateError>) -> Self {
        Self {
            phase,
            source: source.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.source.exit_code()
    }
}
