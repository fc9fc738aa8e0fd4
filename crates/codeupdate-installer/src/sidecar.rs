use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs_utils::remove_file_if_exists;

const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DownloadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub url: String,
    pub expected_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
    pub captured_at_unix: u64,
}

impl DownloadMetadata {
    pub fn matches(&self, other: &DownloadMetadata) -> bool {
        if self.url != other.url || self.expected_size != other.expected_size {
            return false;
        }
        match (&self.validator, &other.validator) {
            (Some(left), Some(right)) => left == right,
            _ => true,
        }
    }
}

pub fn sidecar_path(artifact_path: &Path) -> PathBuf {
    let mut raw = artifact_path.as_os_str().to_os_string();
    raw.push(SIDECAR_SUFFIX);
    PathBuf::from(raw)
}

pub fn read_sidecar(path: &Path) -> Result<Option<DownloadMetadata>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read sidecar {}", path.display()))
        }
    };
    let metadata = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse sidecar {}", path.display()))?;
    Ok(Some(metadata))
}

pub fn write_sidecar(path: &Path, metadata: &DownloadMetadata) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(metadata).context("failed to serialize download metadata")?;
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = fs::write(&tmp, rendered)
        .with_context(|| format!("failed to write sidecar {}", tmp.display()))
        .and_then(|()| {
            fs::rename(&tmp, path).with_context(|| {
                format!("failed to move sidecar into place: {}", path.display())
            })
        });
    if written.is_err() {
        let _ = remove_file_if_exists(&tmp);
    }
    written
}
