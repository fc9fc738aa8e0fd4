use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Result};
use codeupdate_core::Edition;
use tracing::{debug, info};

use crate::native::run_command;
use crate::registry::ResourceRegistry;

pub trait WarningPresenter {
    fn present(&mut self, message: &str, registry: &mut ResourceRegistry);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPresenter;

impl WarningPresenter for NoopPresenter {
    fn present(&mut self, message: &str, _registry: &mut ResourceRegistry) {
        debug!(message, "warning not presented; no desktop presenter configured");
    }
}

#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: PathBuf,
    title: String,
}

impl DesktopNotifier {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("notify-send"),
            title: title.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn has_display() -> bool {
        ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|key| std::env::var_os(key).is_some_and(|value| !value.is_empty()))
    }
}

impl WarningPresenter for DesktopNotifier {
    fn present(&mut self, message: &str, registry: &mut ResourceRegistry) {
        let spawned = Command::new(&self.program)
            .arg("--app-name=codeupdate")
            .arg("--urgency=normal")
            .arg(&self.title)
            .arg(message)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let child = match spawned {
            Ok(child) => child,
            Err(err) => {
                debug!(program = %self.program.display(), error = %err, "desktop notification unavailable");
                return;
            }
        };

        registry.register_child(child);
    }
}

pub trait BackupRunner {
    fn run_backup(&mut self, edition: Edition, scratch_dir: &Path) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ScriptBackup {
    script: PathBuf,
}

impl ScriptBackup {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

impl BackupRunner for ScriptBackup {
    fn run_backup(&mut self, edition: Edition, scratch_dir: &Path) -> Result<()> {
        if !self.script.is_file() {
            return Err(anyhow!(
                "backup script not found: {}",
                self.script.display()
            ));
        }

        info!(script = %self.script.display(), "running backup script");
        let mut command = Command::new(&self.script);
        command
            .arg(edition.as_str())
            .arg(scratch_dir)
            .env("CODEUPDATE_EDITION", edition.as_str())
            .env("CODEUPDATE_SCRATCH_DIR", scratch_dir);
        run_command(&mut command, "backup script failed")
    }
}
