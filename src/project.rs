// src/project.rs

//! The local CumulusCI project the CLI is run from.
//!
//! A project is the nearest ancestor directory containing `.git` and a
//! `cumulusci.yml`. From it we read:
//! - project name, tasks, flows and scratch org configs (cumulusci.yml)
//! - GitHub owner / repo name (origin remote in .git/config)
//! - the current branch and commit (HEAD)
//!
//! `D2X_REPO_OWNER`, `D2X_REPO_NAME` and `D2X_REPO_COMMIT` override the git
//! values, which is handy in CI checkouts without remotes.

use crate::error::ConfigError;
use crate::util::read_to_string;

use anyhow::{Context, Result};
use regex::Regex;
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CUMULUSCI_YML: &str = "cumulusci.yml";

#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub config: YamlValue,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,
    pub repo_commit: Option<String>,
}

impl ProjectConfig {
    /// Walk up from `start` to the repository root and load the project.
    pub fn discover(start: &Path) -> Result<Self> {
        let root = find_repo_root(start).ok_or_else(|| {
            ConfigError::new(format!(
                "No repository found in {} or any parent directory. Run this command from a CumulusCI project.",
                start.display()
            ))
        })?;

        Self::load(&root)
    }

    /// Load the project rooted at `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let yml_path = root.join(CUMULUSCI_YML);
        if !yml_path.exists() {
            return Err(ConfigError::new(format!(
                "No {} found in {}",
                CUMULUSCI_YML,
                root.display()
            ))
            .into());
        }

        let config: YamlValue = serde_yaml::from_str(&read_to_string(&yml_path)?)
            .with_context(|| format!("Failed to parse {:?}", yml_path))?;

        let git_dir = root.join(".git");
        let (repo_owner, repo_name) = match origin_url(&git_dir).and_then(|u| parse_repo_url(&u)) {
            Some((owner, name)) => (Some(owner), Some(name)),
            None => (None, None),
        };
        let (_, repo_commit) = read_head(&git_dir);

        Ok(Self {
            root: root.to_path_buf(),
            config,
            repo_owner: std::env::var("D2X_REPO_OWNER").ok().or(repo_owner),
            repo_name: std::env::var("D2X_REPO_NAME").ok().or(repo_name),
            repo_commit: std::env::var("D2X_REPO_COMMIT").ok().or(repo_commit),
        })
    }

    /// Look up a dot-path (`orgs.scratch.dev`) in cumulusci.yml.
    pub fn lookup(&self, path: &str) -> Option<&YamlValue> {
        lookup_yaml(&self.config, path)
    }

    pub fn scratch_config(&self, name: &str) -> Option<&YamlValue> {
        self.lookup("orgs.scratch")
            .and_then(|v| v.get(name))
            .filter(|v| !v.is_null())
    }

    /// Task definitions from cumulusci.yml, keyed by task name.
    pub fn tasks(&self) -> BTreeMap<String, YamlValue> {
        let mut out = BTreeMap::new();
        if let Some(YamlValue::Mapping(map)) = self.lookup("tasks") {
            for (k, v) in map {
                if let Some(name) = k.as_str() {
                    out.insert(name.to_string(), v.clone());
                }
            }
        }
        out
    }

    pub fn repo_owner(&self) -> Result<&str> {
        self.repo_owner.as_deref().ok_or_else(|| {
            ConfigError::new("Could not determine the GitHub repo owner from the origin remote").into()
        })
    }

    pub fn repo_name(&self) -> Result<&str> {
        self.repo_name.as_deref().ok_or_else(|| {
            ConfigError::new("Could not determine the GitHub repo name from the origin remote").into()
        })
    }

    pub fn repo_commit(&self) -> Result<&str> {
        self.repo_commit.as_deref().ok_or_else(|| {
            ConfigError::new("Could not determine the current commit from .git/HEAD").into()
        })
    }
}

/// Resolve a dot-path inside a YAML document.
pub fn lookup_yaml<'a>(root: &'a YamlValue, path: &str) -> Option<&'a YamlValue> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return None;
        }
        current = current.get(segment)?;
    }
    Some(current)
}

fn find_repo_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// URL of the `origin` remote from `.git/config`.
fn origin_url(git_dir: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(git_dir.join("config")).ok()?;
    let mut in_origin = false;

    for line in raw.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "url" {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// Split a GitHub remote URL into `(owner, repo)`.
///
/// Accepts https, `git@host:owner/repo.git` and `ssh://` forms.
pub fn parse_repo_url(url: &str) -> Option<(String, String)> {
    let re = Regex::new(r"^(?:https?://|ssh://)?(?:[^@/]+@)?[^/:]+[:/](?P<owner>[^/]+)/(?P<repo>[^/]+?)(?:\.git)?/?$")
        .ok()?;
    let caps = re.captures(url.trim())?;
    Some((caps["owner"].to_string(), caps["repo"].to_string()))
}

/// Current branch (if on one) and commit sha from HEAD.
fn read_head(git_dir: &Path) -> (Option<String>, Option<String>) {
    let head = match std::fs::read_to_string(git_dir.join("HEAD")) {
        Ok(h) => h.trim().to_string(),
        Err(_) => return (None, None),
    };

    match head.strip_prefix("ref: ") {
        Some(reference) => {
            let branch = reference.strip_prefix("refs/heads/").map(str::to_string);
            (branch, resolve_ref(git_dir, reference))
        }
        None => (None, Some(head)),
    }
}

fn resolve_ref(git_dir: &Path, reference: &str) -> Option<String> {
    if let Ok(sha) = std::fs::read_to_string(git_dir.join(reference)) {
        return Some(sha.trim().to_string());
    }

    let packed = std::fs::read_to_string(git_dir.join("packed-refs")).ok()?;
    packed.lines().find_map(|line| {
        let (sha, name) = line.split_once(' ')?;
        (name.trim() == reference).then(|| sha.to_string())
    })
}
