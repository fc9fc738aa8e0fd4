use anyhow::{anyhow, Context, Result};
use codeupdate_core::{PackageManager, SystemProfile, UpdateError};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::fs_utils::current_euid;

pub trait PackageInstaller {
    fn install(&self, artifact: &Path, profile: &SystemProfile) -> Result<(), UpdateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallInteractionPolicy {
    pub allow_prompt_escalation: bool,
    pub allow_non_prompt_escalation: bool,
}

impl InstallInteractionPolicy {
    pub fn unattended() -> Self {
        Self {
            allow_prompt_escalation: false,
            allow_non_prompt_escalation: true,
        }
    }
}

impl Default for InstallInteractionPolicy {
    fn default() -> Self {
        Self {
            allow_prompt_escalation: true,
            allow_non_prompt_escalation: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeInstaller {
    interaction_policy: InstallInteractionPolicy,
    running_as_root: bool,
}

impl NativeInstaller {
    pub fn new(interaction_policy: InstallInteractionPolicy) -> Self {
        Self {
            interaction_policy,
            running_as_root: current_euid() == 0,
        }
    }

    pub fn with_root(mut self, running_as_root: bool) -> Self {
        self.running_as_root = running_as_root;
        self
    }

    pub(crate) fn install_with_runner<RunCommand>(
        &self,
        artifact: &Path,
        profile: &SystemProfile,
        mut run_command_executor: RunCommand,
    ) -> Result<(), UpdateError>
    where
        RunCommand: FnMut(&mut Command, &str) -> Result<()>,
    {
        let escalation = self.escalation()?;
        let artifact = artifact.as_os_str().to_os_string();
        info!(
            manager = profile.package_manager.as_str(),
            artifact = %Path::new(&artifact).display(),
            "installing package"
        );

        match profile.package_manager {
            PackageManager::Apt => {
                let mut dpkg = escalated(escalation, "dpkg", &[OsString::from("-i"), artifact]);
                let Err(install_err) = run_command_executor(&mut dpkg, "dpkg install failed")
                else {
                    return Ok(());
                };

                warn!(error = %install_err, "dpkg reported a failure; attempting dependency repair");
                let mut repair = escalated(
                    escalation,
                    "apt-get",
                    &[
                        OsString::from("install"),
                        OsString::from("-f"),
                        OsString::from("-y"),
                    ],
                );
                run_command_executor(&mut repair, "apt-get dependency repair failed").map_err(
                    |repair_err| {
                        UpdateError::Install(format!("{install_err:#}; then {repair_err:#}"))
                    },
                )
            }
            PackageManager::Dnf | PackageManager::Yum => {
                let manager = profile.package_manager.as_str();
                let mut install = escalated(
                    escalation,
                    manager,
                    &[OsString::from("install"), OsString::from("-y"), artifact],
                );
                run_command_executor(&mut install, &format!("{manager} install failed"))
                    .map_err(|err| UpdateError::Install(format!("{err:#}")))
            }
            PackageManager::Zypper => {
                let mut install = escalated(
                    escalation,
                    "zypper",
                    &[
                        OsString::from("--non-interactive"),
                        OsString::from("install"),
                        OsString::from("--allow-unsigned-rpm"),
                        artifact,
                    ],
                );
                run_command_executor(&mut install, "zypper install failed")
                    .map_err(|err| UpdateError::Install(format!("{err:#}")))
            }
        }
    }

    fn escalation(&self) -> Result<Escalation, UpdateError> {
        if self.running_as_root {
            return Ok(Escalation::None);
        }
        if self.interaction_policy.allow_prompt_escalation {
            return Ok(Escalation::Sudo);
        }
        if self.interaction_policy.allow_non_prompt_escalation {
            return Ok(Escalation::SudoNonInteractive);
        }
        Err(UpdateError::Install(
            "package installation requires escalation but policy forbids it".to_string(),
        ))
    }
}

impl PackageInstaller for NativeInstaller {
    fn install(&self, artifact: &Path, profile: &SystemProfile) -> Result<(), UpdateError> {
        self.install_with_runner(artifact, profile, run_command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escalation {
    None,
    Sudo,
    SudoNonInteractive,
}

fn escalated(escalation: Escalation, program: &str, args: &[OsString]) -> Command {
    let mut command = match escalation {
        Escalation::None => Command::new(program),
        Escalation::Sudo => {
            let mut command = Command::new("sudo");
            command.arg(program);
            command
        }
        Escalation::SudoNonInteractive => {
            let mut command = Command::new("sudo");
            command.arg("-n").arg(program);
            command
        }
    };
    command.args(args);
    command
}

pub(crate) fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    debug!(command = %render_command_line(command), "running command");
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

pub(crate) fn render_command_line(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
