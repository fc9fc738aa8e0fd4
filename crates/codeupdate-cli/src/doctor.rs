use std::path::Path;

use codeupdate_core::{SystemProfile, UpdateConfig};
use codeupdate_installer::{
    preflight_checks, read_lock_record, read_sidecar, sidecar_path, HostDetector, ProcessTable,
    SystemDetector, UpdateLayout,
};

use crate::render::{render_status_line, OutputStyle};

/// Read-only report of the host and the updater's on-disk state.
pub(crate) fn doctor_lines(
    config: &UpdateConfig,
    layout: &UpdateLayout,
    detector: &HostDetector,
    processes: &dyn ProcessTable,
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = vec![
        format!("edition: {}", config.edition),
        format!("cache: {}", layout.cache_dir().display()),
        format!("lock: {}", layout.lock_path().display()),
        lock_state_line(layout.lock_path(), processes, style),
    ];

    match detector.detect() {
        Ok(profile) => {
            lines.push(format!(
                "system: {} ({}, {}, {})",
                profile.distro_id,
                profile.package_manager,
                profile.package_format,
                profile.arch
            ));
            lines.push(cached_artifact_line(
                &layout.artifact_cache_path(config.edition, &profile),
                style,
            ));
            lines.push(preflight_line(&profile, detector, style));
        }
        Err(err) => lines.push(render_status_line(style, "err", &format!("system: {err}"))),
    }

    lines
}

fn lock_state_line(lock_path: &Path, processes: &dyn ProcessTable, style: OutputStyle) -> String {
    match read_lock_record(lock_path) {
        Ok(None) => render_status_line(style, "ok", "lock state: free"),
        Ok(Some(record)) => match record.owner_pid {
            Some(pid) if processes.is_alive(pid) => render_status_line(
                style,
                "warn",
                &format!("lock state: held by running pid {pid}"),
            ),
            Some(pid) => render_status_line(
                style,
                "warn",
                &format!("lock state: stale (pid {pid} is gone; next run reclaims it)"),
            ),
            None => render_status_line(
                style,
                "warn",
                "lock state: stale (no pid recorded; next run reclaims it)",
            ),
        },
        Err(err) => render_status_line(style, "err", &format!("lock state: {err:#}")),
    }
}

fn cached_artifact_line(artifact: &Path, style: OutputStyle) -> String {
    let size = match std::fs::metadata(artifact) {
        Ok(metadata) => metadata.len(),
        Err(_) => return render_status_line(style, "ok", "cached package: none"),
    };

    let message = match read_sidecar(&sidecar_path(artifact)) {
        Ok(Some(metadata)) if size >= metadata.expected_size => format!(
            "cached package: complete, {size} bytes{}",
            metadata
                .version
                .map(|version| format!(" (version {version})"))
                .unwrap_or_default()
        ),
        Ok(Some(metadata)) => format!(
            "cached package: partial, {size} of {} bytes",
            metadata.expected_size
        ),
        Ok(None) => format!("cached package: {size} bytes, no metadata"),
        Err(err) => {
            return render_status_line(
                style,
                "warn",
                &format!("cached package: {size} bytes, unreadable metadata ({err:#})"),
            )
        }
    };
    render_status_line(style, "ok", &message)
}

fn preflight_line(profile: &SystemProfile, detector: &HostDetector, style: OutputStyle) -> String {
    match preflight_checks(profile, detector.path_var()) {
        Ok(()) => render_status_line(style, "ok", "self-checks: passed"),
        Err(err) => render_status_line(style, "err", &format!("self-checks: {err}")),
    }
}
