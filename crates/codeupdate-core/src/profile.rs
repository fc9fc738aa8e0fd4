use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageFormat {
    Deb,
    Rpm,
}

impl PackageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deb => "deb",
            Self::Rpm => "rpm",
        }
    }

    pub fn cache_extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
    Zypper,
}

impl PackageManager {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Zypper => "zypper",
        }
    }

    pub fn package_format(self) -> PackageFormat {
        match self {
            Self::Apt => PackageFormat::Deb,
            Self::Dnf | Self::Yum | Self::Zypper => PackageFormat::Rpm,
        }
    }

    /// Executables that must be on PATH for this manager to be usable.
    pub fn required_tools(self) -> &'static [&'static str] {
        match self {
            Self::Apt => &["dpkg", "apt-get"],
            Self::Dnf => &["dnf", "rpm"],
            Self::Yum => &["yum", "rpm"],
            Self::Zypper => &["zypper", "rpm"],
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X64,
    Arm64,
    Armhf,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
            Self::Armhf => "armhf",
        }
    }

    /// Accepts kernel machine names (`uname -m`), Rust arch names and distro arch labels.
    pub fn from_machine(machine: &str) -> Option<Self> {
        match machine.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" | "x64" => Some(Self::X64),
            "aarch64" | "arm64" => Some(Self::Arm64),
            "arm" | "armv7l" | "armv7" | "armhf" => Some(Self::Armhf),
            _ => None,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemProfile {
    pub distro_id: String,
    pub package_manager: PackageManager,
    pub package_format: PackageFormat,
    pub arch: Arch,
}

impl SystemProfile {
    pub fn new(distro_id: impl Into<String>, package_manager: PackageManager, arch: Arch) -> Self {
        Self {
            distro_id: distro_id.into(),
            package_manager,
            package_format: package_manager.package_format(),
            arch,
        }
    }

    /// Platform token of the update service, e.g. `linux-deb-x64`.
    pub fn platform(&self) -> String {
        format!("linux-{}-{}", self.package_format, self.arch)
    }
}
