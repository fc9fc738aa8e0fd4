use anyhow::{Context, Result};
use codeupdate_core::{Edition, SystemProfile};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fs_utils::{current_unix_timestamp, is_writable_dir};

const LOCK_FILE_NAME: &str = "codeupdate.lock";
const HOST_LOCK_DIRS: [&str; 3] = ["/run/lock", "/var/lock", "/tmp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    cache_dir: PathBuf,
    lock_path: PathBuf,
    temp_root: PathBuf,
}

impl UpdateLayout {
    pub fn new(cache_dir: impl Into<PathBuf>, lock_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            lock_path: lock_dir.as_ref().join(LOCK_FILE_NAME),
            temp_root: std::env::temp_dir(),
        }
    }

    pub fn for_current_user(cache_override: Option<&Path>) -> Result<Self> {
        let cache_dir = match cache_override {
            Some(dir) => dir.to_path_buf(),
            None => default_cache_dir()?,
        };
        Ok(Self {
            cache_dir,
            lock_path: default_lock_path(),
            temp_root: std::env::temp_dir(),
        })
    }

    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.cache_dir.join("artifacts")
    }

    pub fn artifact_cache_path(&self, edition: Edition, profile: &SystemProfile) -> PathBuf {
        self.artifacts_dir().join(format!(
            "code-{}-{}.{}",
            edition.as_str(),
            profile.platform(),
            profile.package_format.cache_extension()
        ))
    }

    pub fn scratch_roots(&self) -> Vec<PathBuf> {
        vec![self.temp_root.clone(), self.cache_dir.clone()]
    }

    pub fn make_scratch_dir(&self, prefix: &str) -> Result<PathBuf> {
        let mut dir = self.temp_root.clone();
        dir.push(format!(
            "codeupdate-{}-{}-{}",
            prefix,
            std::process::id(),
            current_unix_timestamp()?
        ));
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating scratch dir: {}", dir.display()))?;
        Ok(dir)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        let lock_parent = self.lock_path.parent().map(Path::to_path_buf);
        for dir in [Some(self.cache_dir.clone()), Some(self.artifacts_dir()), lock_parent]
            .into_iter()
            .flatten()
        {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_cache_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CACHE_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir).join("codeupdate"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve cache dir")?;
    Ok(PathBuf::from(home).join(".cache").join("codeupdate"))
}

pub fn default_lock_path() -> PathBuf {
    let dirs = HOST_LOCK_DIRS.iter().map(PathBuf::from).collect::<Vec<_>>();
    lock_path_in(&dirs)
}

// First writable directory of `dirs`; the last one when none is writable, so the
// acquire error names a real location.
pub(crate) fn lock_path_in(dirs: &[PathBuf]) -> PathBuf {
    dirs.iter()
        .find(|dir| is_writable_dir(dir))
        .or_else(|| dirs.last())
        .map(|dir| dir.join(LOCK_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(LOCK_FILE_NAME))
}
