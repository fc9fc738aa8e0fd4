use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use codeupdate_core::{PackageFormat, UpdateError};
use tracing::debug;

const AR_MAGIC: &[u8] = b"!<arch>\n";
const DEB_FIRST_MEMBER: &[u8] = b"debian-binary";
const RPM_LEAD_MAGIC: &[u8] = &[0xED, 0xAB, 0xEE, 0xDB];
const HEADER_LEN: usize = 64;

pub fn verify_artifact(
    path: &Path,
    expected_format: PackageFormat,
    expected_size: u64,
) -> Result<(), UpdateError> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("failed to inspect artifact {}", path.display()))?;
    let actual_size = metadata.len();
    if actual_size == 0 {
        return Err(UpdateError::Verification(format!(
            "{} is empty",
            path.display()
        )));
    }
    if actual_size != expected_size {
        return Err(UpdateError::Verification(format!(
            "{} has {actual_size} bytes but {expected_size} were expected",
            path.display()
        )));
    }

    let header = read_header(path)?;
    match detect_package_format(&header) {
        Some(found) if found == expected_format => {
            debug!(path = %path.display(), format = found.as_str(), "artifact signature ok");
            Ok(())
        }
        Some(found) => Err(UpdateError::Verification(format!(
            "{} is a {} package but {} was expected",
            path.display(),
            found,
            expected_format
        ))),
        None if looks_like_markup(&header) => Err(UpdateError::Verification(format!(
            "{} looks like an HTML or XML page rather than a {} package; the download \
             URL may have returned an error page",
            path.display(),
            expected_format
        ))),
        None => Err(UpdateError::Verification(format!(
            "{} does not carry a {} signature",
            path.display(),
            expected_format
        ))),
    }
}

pub fn detect_package_format(header: &[u8]) -> Option<PackageFormat> {
    if header.starts_with(RPM_LEAD_MAGIC) {
        return Some(PackageFormat::Rpm);
    }
    let member = header.strip_prefix(AR_MAGIC)?;
    member
        .starts_with(DEB_FIRST_MEMBER)
        .then_some(PackageFormat::Deb)
}

fn read_header(path: &Path) -> Result<Vec<u8>, UpdateError> {
    let file = File::open(path)
        .with_context(|| format!("failed to open artifact {}", path.display()))?;
    let mut header = Vec::with_capacity(HEADER_LEN);
    file.take(HEADER_LEN as u64)
        .read_to_end(&mut header)
        .with_context(|| format!("failed to read artifact {}", path.display()))?;
    Ok(header)
}

fn looks_like_markup(header: &[u8]) -> bool {
    let text = String::from_utf8_lossy(header);
    let trimmed = text.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html") || trimmed.starts_with("<?xml")
}
