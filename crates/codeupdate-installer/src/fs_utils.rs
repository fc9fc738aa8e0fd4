use std::ffi::CString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

pub fn file_len_or_zero(path: &Path) -> io::Result<u64> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(err) => Err(err),
    }
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}

pub fn current_euid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

pub fn is_writable_dir(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;

    if !path.is_dir() {
        return false;
    }
    let Ok(raw) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: `raw` is a valid NUL-terminated path for the duration of the call.
    unsafe { libc::access(raw.as_ptr(), libc::W_OK) == 0 }
}

pub fn owned_by_current_user(path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let metadata = fs::symlink_metadata(path)?;
    Ok(metadata.uid() == current_euid())
}

// True when `path` lies strictly below one of `roots`. Relative paths and paths with
// `..` components never qualify; symlinked parents are resolved before comparing.
pub fn is_confined_to(path: &Path, roots: &[PathBuf]) -> bool {
    if !path.is_absolute()
        || path
            .components()
            .any(|component| matches!(component, Component::ParentDir))
    {
        return false;
    }

    let resolved = resolve_parent(path);
    roots.iter().any(|root| {
        let root = fs::canonicalize(root).unwrap_or_else(|_| root.clone());
        resolved != root && resolved.starts_with(&root)
    })
}

fn resolve_parent(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
