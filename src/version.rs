// src/version.rs

//! `d2x version` and the hourly "newer release available" notice.

use crate::config::d2x_home;
use crate::output::{paint, stderr_use_color, should_use_color};
use crate::util::{ensure_dir, now_ts};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::time::Duration;

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const RELEASES_REPO: &str = "muselab-d2x/d2x-cli";
const GITHUB_API: &str = "https://api.github.com";
const TIMESTAMP_FILE: &str = "d2x_version.timestamp";
const CHECK_INTERVAL_SECS: i64 = 3600;

/// Numeric dotted version (`1.2.10`).
#[derive(Debug, Clone)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().trim_start_matches('v');
        if !is_final_release(raw) {
            return None;
        }
        raw.split('.')
            .map(|p| p.parse().ok())
            .collect::<Option<Vec<u64>>>()
            .map(Version)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    /// Missing components count as zero, so `1.2 == 1.2.0`.
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

/// Final releases contain only digits and dots (`1.0.1`, not `2.0b1`).
pub fn is_final_release(version: &str) -> bool {
    Regex::new(r"^[0-9]+(\.[0-9]+)*$")
        .map(|re| re.is_match(version))
        .unwrap_or(false)
}

#[derive(Debug, Deserialize)]
struct Release {
    tag_name: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

/// Highest final release published on GitHub.
pub async fn latest_final_version(api_base: &str) -> Result<Option<Version>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .user_agent(concat!("d2x-cli/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let releases: Vec<Release> = client
        .get(format!("{}/repos/{}/releases", api_base.trim_end_matches('/'), RELEASES_REPO))
        .header("Accept", "application/vnd.github+json")
        .send()
        .await
        .context("Failed to fetch D2X CLI releases")?
        .error_for_status()
        .context("GitHub releases request failed")?
        .json()
        .await
        .context("Invalid GitHub releases response")?;

    Ok(releases
        .iter()
        .filter(|r| !r.draft && !r.prerelease)
        .filter_map(|r| Version::parse(&r.tag_name))
        .max())
}

pub fn release_notes_link(version: &Version) -> String {
    format!("https://github.com/{}/releases/tag/v{}", RELEASES_REPO, version)
}

fn current() -> Version {
    Version::parse(CURRENT_VERSION).unwrap_or(Version(vec![0]))
}

/// `d2x version`.
pub async fn show_version_info() -> Result<()> {
    let exe = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "d2x".to_string());
    println!("D2X version: {} ({})", CURRENT_VERSION, exe);
    println!();

    let latest = match latest_final_version(GITHUB_API).await {
        Ok(Some(v)) => v,
        Ok(None) => return Ok(()),
        Err(err) => {
            tracing::debug!(error = %err, "version lookup failed");
            eprintln!("Could not check for the latest D2X CLI version.");
            return Ok(());
        }
    };

    if latest > current() {
        println!(
            "{}",
            paint(
                &format!("There is a newer version of D2X CLI available: {}", latest),
                "33",
                should_use_color()
            )
        );
    } else {
        println!("You have the latest version of D2X CLI");
    }
    println!("Release notes: {}", release_notes_link(&latest));
    Ok(())
}

/// Print an upgrade hint at most once per hour. Never fails the command.
pub async fn check_latest_version() {
    let stamp = d2x_home().join(TIMESTAMP_FILE);
    if !check_due(&std::fs::read_to_string(&stamp).unwrap_or_default(), now_ts()) {
        return;
    }

    if let Err(err) = write_timestamp(&stamp) {
        tracing::debug!(error = %err, "could not record version check");
    }

    match latest_final_version(GITHUB_API).await {
        Ok(Some(latest)) if latest > current() => eprintln!(
            "{}",
            paint(
                &format!(
                    "An update to D2X CLI is available ({}). Release notes: {}",
                    latest,
                    release_notes_link(&latest)
                ),
                "33",
                stderr_use_color()
            )
        ),
        Ok(_) => {}
        Err(err) => tracing::debug!(error = %err, "version check failed"),
    }
}

fn check_due(stamp: &str, now: i64) -> bool {
    let last: i64 = stamp.trim().parse().unwrap_or(0);
    now - last > CHECK_INTERVAL_SECS
}

fn write_timestamp(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    std::fs::write(path, now_ts().to_string())
        .with_context(|| format!("Failed to write {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn final_releases_are_digits_and_dots() {
        assert!(is_final_release("1.0.1"));
        assert!(!is_final_release("2.0b1"));
        assert!(!is_final_release("2.0.dev0"));
        assert!(Version::parse("v0.3.0").is_some());
    }

    #[test]
    fn versions_compare_numerically() {
        let v = |s| Version::parse(s).unwrap();
        assert!(v("0.10.0") > v("0.9.9"));
        assert_eq!(v("1.2").cmp(&v("1.2.0")), Ordering::Equal);
    }

    #[test]
    fn check_runs_at_most_hourly() {
        assert!(check_due("", 10_000));
        assert!(!check_due("9000", 10_000));
        assert!(check_due("5000", 10_000));
    }

    #[test]
    fn release_link_uses_tag() {
        let v = Version::parse("1.4.0").unwrap();
        assert_eq!(
            release_notes_link(&v),
            "https://github.com/muselab-d2x/d2x-cli/releases/tag/v1.4.0"
        );
    }

    #[tokio::test]
    async fn latest_skips_prereleases() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/muselab-d2x/d2x-cli/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"tag_name": "v0.4.0b1", "prerelease": true},
                {"tag_name": "v0.3.2"},
                {"tag_name": "v0.10.0", "draft": true},
                {"tag_name": "v0.3.10"}
            ])))
            .mount(&server)
            .await;

        let latest = latest_final_version(&server.uri()).await.unwrap();
        assert_eq!(latest.unwrap().to_string(), "0.3.10");
    }
}
