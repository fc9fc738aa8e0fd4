use semver::Version;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub product_version: String,
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBuild {
    pub version: String,
    pub commit: Option<String>,
}

impl InstalledBuild {
    /// Parses `<binary> --version` output: version line, commit line, arch line.
    pub fn from_version_output(raw: &str) -> Option<Self> {
        let mut lines = raw.lines().map(str::trim).filter(|line| !line.is_empty());
        let version = lines.next()?.to_string();
        let commit = lines
            .next()
            .filter(|line| is_commit_hash(line))
            .map(ToOwned::to_owned);
        Some(Self { version, commit })
    }
}

fn is_commit_hash(value: &str) -> bool {
    value.len() >= 7 && value.chars().all(|c| c.is_ascii_hexdigit())
}

/// Builds are equal when their commits match. Without commits on both sides, only stable
/// semver versions are compared; insiders builds share a version across commits.
pub fn is_up_to_date(installed: &InstalledBuild, latest: &ReleaseInfo) -> bool {
    if let (Some(installed_commit), Some(latest_commit)) = (&installed.commit, &latest.commit) {
        return installed_commit.eq_ignore_ascii_case(latest_commit);
    }

    let (Ok(installed_version), Ok(latest_version)) = (
        Version::parse(installed.version.trim()),
        Version::parse(latest.product_version.trim()),
    ) else {
        return false;
    };
    if !installed_version.pre.is_empty() || !latest_version.pre.is_empty() {
        return false;
    }
    installed_version >= latest_version
}
