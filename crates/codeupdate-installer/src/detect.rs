use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use codeupdate_core::{Arch, ConfigError, PackageManager, SystemProfile};
use tracing::{debug, info};

use crate::fs_utils::current_euid;

const OS_RELEASE_PATH: &str = "/etc/os-release";
const FALLBACK_ORDER: [PackageManager; 4] = [
    PackageManager::Apt,
    PackageManager::Dnf,
    PackageManager::Yum,
    PackageManager::Zypper,
];

pub trait SystemDetector {
    fn detect(&self) -> Result<SystemProfile, ConfigError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
}

pub fn parse_os_release(raw: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in raw.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "ID" => release.id = value.to_ascii_lowercase(),
            "ID_LIKE" => {
                release.id_like = value
                    .split_whitespace()
                    .map(str::to_ascii_lowercase)
                    .collect()
            }
            _ => {}
        }
    }
    release
}

fn family_candidates(family: &str) -> &'static [PackageManager] {
    match family {
        "debian" | "ubuntu" | "linuxmint" | "pop" | "elementary" | "raspbian" => {
            &[PackageManager::Apt]
        }
        "fedora" | "rhel" | "centos" | "rocky" | "almalinux" | "ol" | "amzn" => {
            &[PackageManager::Dnf, PackageManager::Yum]
        }
        "suse" | "opensuse" | "opensuse-leap" | "opensuse-tumbleweed" | "sles" => {
            &[PackageManager::Zypper]
        }
        _ => &[],
    }
}

fn primary_tool(manager: PackageManager) -> &'static str {
    match manager {
        PackageManager::Apt => "apt-get",
        other => other.as_str(),
    }
}

pub fn choose_package_manager<HasTool>(release: &OsRelease, has_tool: HasTool) -> Option<PackageManager>
where
    HasTool: Fn(&str) -> bool,
{
    let hinted = std::iter::once(release.id.as_str())
        .chain(release.id_like.iter().map(String::as_str))
        .flat_map(family_candidates)
        .copied();
    hinted
        .chain(FALLBACK_ORDER)
        .find(|manager| has_tool(primary_tool(*manager)))
}

pub fn find_on_path(name: &str, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let path_var = path_var?;
    std::env::split_paths(path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

pub struct HostDetector {
    os_release_path: PathBuf,
    path_var: Option<OsString>,
    machine: String,
}

impl HostDetector {
    pub fn new() -> Self {
        Self {
            os_release_path: PathBuf::from(OS_RELEASE_PATH),
            path_var: std::env::var_os("PATH"),
            machine: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release_path = path.into();
        self
    }

    pub fn with_path_var(mut self, path_var: impl Into<OsString>) -> Self {
        self.path_var = Some(path_var.into());
        self
    }

    pub fn with_machine(mut self, machine: impl Into<String>) -> Self {
        self.machine = machine.into();
        self
    }

    pub fn path_var(&self) -> Option<&OsStr> {
        self.path_var.as_deref()
    }
}

impl Default for HostDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemDetector for HostDetector {
    fn detect(&self) -> Result<SystemProfile, ConfigError> {
        let arch = Arch::from_machine(&self.machine)
            .ok_or_else(|| ConfigError::UnsupportedArch(self.machine.clone()))?;

        let release = match fs::read_to_string(&self.os_release_path) {
            Ok(raw) => parse_os_release(&raw),
            Err(err) => {
                debug!(
                    path = %self.os_release_path.display(),
                    error = %err,
                    "os-release unavailable; relying on PATH only"
                );
                OsRelease::default()
            }
        };

        let path_var = self.path_var.as_deref();
        let manager = choose_package_manager(&release, |tool| {
            find_on_path(tool, path_var).is_some()
        })
        .ok_or_else(|| {
            ConfigError::NoPackageManager(
                FALLBACK_ORDER
                    .iter()
                    .map(|manager| primary_tool(*manager))
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        })?;

        let distro_id = if release.id.is_empty() {
            "unknown".to_string()
        } else {
            release.id
        };
        let profile = SystemProfile::new(distro_id, manager, arch);
        info!(
            distro = %profile.distro_id,
            manager = profile.package_manager.as_str(),
            arch = profile.arch.as_str(),
            "detected system profile"
        );
        Ok(profile)
    }
}

pub fn preflight_checks(profile: &SystemProfile, path_var: Option<&OsStr>) -> Result<(), ConfigError> {
    preflight_checks_for_uid(profile, path_var, current_euid())
}

pub(crate) fn preflight_checks_for_uid(
    profile: &SystemProfile,
    path_var: Option<&OsStr>,
    euid: u32,
) -> Result<(), ConfigError> {
    if euid == 0 {
        return Err(ConfigError::SelfCheck(
            "refusing to run as root; run as the desktop user and let the installer use sudo"
                .to_string(),
        ));
    }
    if find_on_path("sudo", path_var).is_none() {
        return Err(ConfigError::SelfCheck(
            "sudo was not found on PATH; it is required to install packages".to_string(),
        ));
    }
    for tool in profile.package_manager.required_tools() {
        if find_on_path(tool, path_var).is_none() {
            return Err(ConfigError::SelfCheck(format!(
                "'{tool}' was not found on PATH; it is required by {}",
                profile.package_manager
            )));
        }
    }
    Ok(())
}
