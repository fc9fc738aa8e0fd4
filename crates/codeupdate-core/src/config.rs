use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::edition::Edition;
use crate::error::ConfigError;

pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
pub const DEFAULT_PARTIAL_THRESHOLD_BYTES: u64 = 1024 * 1024;
/// Upper bound for every timeout and delay; wait loops add these to `Instant::now()`.
pub const MAX_WAIT_SECS: u64 = 24 * 60 * 60;

/// On-disk configuration file. Every key is optional; unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigFile {
    pub edition: Option<String>,
    pub unattended: Option<bool>,
    pub debug: Option<bool>,
    pub cache_dir: Option<PathBuf>,
    pub partial_threshold_bytes: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub skip_checks: Option<bool>,
    pub backup: Option<bool>,
    pub backup_script: Option<PathBuf>,
}

impl ConfigFile {
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Reads `path`. A missing file yields `Ok(None)` unless `required` is set.
    pub fn load(path: &Path, required: bool) -> Result<Option<Self>, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => return Ok(None),
            Err(source) => {
                return Err(ConfigError::ReadConfig {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Self::from_toml_str(&raw)
            .map(Some)
            .map_err(|err| ConfigError::ParseConfig {
                path: path.to_path_buf(),
                message: err.to_string().trim().to_string(),
            })
    }
}

/// Values supplied on the command line; they win over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub edition: Option<String>,
    pub unattended: bool,
    pub debug: bool,
    pub cache_dir: Option<PathBuf>,
    pub partial_threshold_bytes: Option<u64>,
    pub shutdown_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub retry_delay_secs: Option<u64>,
    pub skip_checks: bool,
    pub force: bool,
    pub no_backup: bool,
    pub backup_script: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateConfig {
    pub edition: Edition,
    pub unattended: bool,
    pub debug: bool,
    pub cache_dir: Option<PathBuf>,
    pub partial_threshold_bytes: u64,
    pub shutdown_timeout: Duration,
    pub poll_interval: Duration,
    pub download_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub skip_checks: bool,
    pub force: bool,
    pub backup_enabled: bool,
    pub backup_script: Option<PathBuf>,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            edition: Edition::Stable,
            unattended: false,
            debug: false,
            cache_dir: None,
            partial_threshold_bytes: DEFAULT_PARTIAL_THRESHOLD_BYTES,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_secs(DEFAULT_RETRY_DELAY_SECS),
            skip_checks: false,
            force: false,
            backup_enabled: true,
            backup_script: None,
        }
    }
}

impl UpdateConfig {
    /// Layers defaults, then `file`, then `overrides`, and validates the result.
    pub fn resolve(
        file: Option<&ConfigFile>,
        overrides: &ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let empty = ConfigFile::default();
        let file = file.unwrap_or(&empty);
        let defaults = Self::default();

        let edition = match overrides.edition.as_deref().or(file.edition.as_deref()) {
            Some(raw) => raw.parse::<Edition>()?,
            None => defaults.edition,
        };

        let max_attempts = overrides
            .max_attempts
            .or(file.max_attempts)
            .unwrap_or(defaults.max_attempts);
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max-attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        let shutdown_timeout = bounded_secs(
            "shutdown-timeout",
            overrides.shutdown_timeout_secs.or(file.shutdown_timeout_secs),
            defaults.shutdown_timeout,
            false,
        )?;
        let download_timeout = bounded_secs(
            "download-timeout",
            overrides.download_timeout_secs.or(file.download_timeout_secs),
            defaults.download_timeout,
            false,
        )?;
        let retry_delay = bounded_secs(
            "retry-delay",
            overrides.retry_delay_secs.or(file.retry_delay_secs),
            defaults.retry_delay,
            true,
        )?;

        let backup_script = overrides
            .backup_script
            .clone()
            .or_else(|| file.backup_script.clone());
        let backup_enabled = !overrides.no_backup && file.backup.unwrap_or(true);

        Ok(Self {
            edition,
            unattended: overrides.unattended || file.unattended.unwrap_or(false),
            debug: overrides.debug || file.debug.unwrap_or(false),
            cache_dir: overrides
                .cache_dir
                .clone()
                .or_else(|| file.cache_dir.clone()),
            partial_threshold_bytes: overrides
                .partial_threshold_bytes
                .or(file.partial_threshold_bytes)
                .unwrap_or(defaults.partial_threshold_bytes),
            shutdown_timeout,
            poll_interval: defaults.poll_interval,
            download_timeout,
            max_attempts,
            retry_delay,
            skip_checks: overrides.skip_checks || file.skip_checks.unwrap_or(false),
            force: overrides.force,
            backup_enabled,
            backup_script,
        })
    }
}

fn bounded_secs(
    key: &'static str,
    value: Option<u64>,
    default: Duration,
    allow_zero: bool,
) -> Result<Duration, ConfigError> {
    match value {
        Some(0) if !allow_zero => Err(ConfigError::InvalidValue {
            key,
            reason: "must be greater than zero seconds".to_string(),
        }),
        Some(secs) if secs > MAX_WAIT_SECS => Err(ConfigError::InvalidValue {
            key,
            reason: format!("must be at most {MAX_WAIT_SECS} seconds"),
        }),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(dir).join("codeupdate").join("config.toml"));
    }
    let home = std::env::var_os("HOME").filter(|value| !value.is_empty())?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("codeupdate")
            .join("config.toml"),
    )
}
