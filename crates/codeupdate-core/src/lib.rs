mod config;
mod edition;
mod error;
mod profile;
mod release;

pub use config::{default_config_path, ConfigFile, ConfigOverrides, UpdateConfig, MAX_WAIT_SECS};
pub use edition::Edition;
pub use error::{ConfigError, Phase, PhaseError, UpdateError, EXIT_FAILURE, EXIT_INTERRUPTED};
pub use profile::{Arch, PackageFormat, PackageManager, SystemProfile};
pub use release::{is_up_to_date, InstalledBuild, ReleaseInfo};

#[cfg(test)]
mod tests;
