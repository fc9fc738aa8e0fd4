use std::io;
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use codeupdate_core::{Edition, InstalledBuild, ReleaseInfo, SystemProfile};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_UPDATE_SERVICE: &str = "https://update.code.visualstudio.com";
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(15);

pub trait ReleaseSource {
    fn latest(&self, edition: Edition, profile: &SystemProfile) -> Result<ReleaseInfo>;
    fn installed(&self, edition: Edition) -> Result<Option<InstalledBuild>>;
}

pub fn download_url(base_url: &str, edition: Edition, profile: &SystemProfile) -> String {
    format!(
        "{}/latest/{}/{}",
        base_url.trim_end_matches('/'),
        profile.platform(),
        edition.channel()
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestReleaseResponse {
    product_version: String,
    #[serde(default)]
    version: Option<String>,
}

pub fn parse_latest_release(raw: &str) -> Result<ReleaseInfo> {
    let response: LatestReleaseResponse =
        serde_json::from_str(raw).context("failed to parse update service response")?;
    if response.product_version.trim().is_empty() {
        return Err(anyhow!("update service response has an empty productVersion"));
    }
    Ok(ReleaseInfo {
        product_version: response.product_version.trim().to_string(),
        commit: response
            .version
            .map(|commit| commit.trim().to_string())
            .filter(|commit| !commit.is_empty()),
    })
}

pub struct UpdateServiceReleases {
    client: Client,
    base_url: String,
}

impl UpdateServiceReleases {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("codeupdate/", env!("CARGO_PKG_VERSION")))
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

impl ReleaseSource for UpdateServiceReleases {
    fn latest(&self, edition: Edition, profile: &SystemProfile) -> Result<ReleaseInfo> {
        let url = format!(
            "{}/api/update/{}/{}/latest",
            self.base_url.trim_end_matches('/'),
            profile.platform(),
            edition.channel()
        );
        debug!(%url, "querying latest release");
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("failed to query {url}"))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("update service returned HTTP {status} for {url}"));
        }
        let body = response
            .text()
            .with_context(|| format!("failed to read response from {url}"))?;
        parse_latest_release(&body)
    }

    fn installed(&self, edition: Edition) -> Result<Option<InstalledBuild>> {
        let binary = edition.process_name();
        let output = match Command::new(binary).arg("--version").output() {
            Ok(output) => output,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to run {binary} --version"))
            }
        };
        if !output.status.success() {
            return Err(anyhow!(
                "{binary} --version exited with {}",
                output.status
            ));
        }
        Ok(InstalledBuild::from_version_output(
            &String::from_utf8_lossy(&output.stdout),
        ))
    }
}
