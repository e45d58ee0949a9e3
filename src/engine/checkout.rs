// src/engine/checkout.rs

//! A job's repository snapshot, unpacked into a temporary directory.

use crate::archive::{extract_zip, flatten_single_root};
use crate::project::CUMULUSCI_YML;
use crate::toolchain::Invocation;
use crate::util::read_to_string;

use anyhow::{Context, Result};
use serde_yaml::Value as YamlValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Checkout {
    pub root: PathBuf,
    env: BTreeMap<String, String>,
}

/// Where the code came from, exported to CumulusCI as `CUMULUSCI_REPO_*`.
#[derive(Debug, Clone, Default)]
pub struct RepoInfo {
    pub commit: String,
    pub branch: Option<String>,
    pub url: Option<String>,
}

impl Checkout {
    /// Unpack `archive` into `root` and prepare it for CumulusCI.
    pub fn unpack(archive: &[u8], root: &Path, repo: &RepoInfo) -> Result<Self> {
        extract_zip(archive, root)?;
        flatten_single_root(root)?;

        // CumulusCI only treats the directory as a repo root when .git exists.
        std::fs::create_dir_all(root.join(".git"))
            .with_context(|| format!("Failed to create {:?}", root.join(".git")))?;

        Ok(Self::new(root, repo))
    }

    pub fn new(root: &Path, repo: &RepoInfo) -> Self {
        let mut env = BTreeMap::new();
        env.insert("CUMULUSCI_DISABLE_REFRESH".to_string(), "True".to_string());
        env.insert("CUMULUSCI_REPO_ROOT".to_string(), root.to_string_lossy().to_string());
        env.insert("CUMULUSCI_REPO_COMMIT".to_string(), repo.commit.clone());
        if let Some(branch) = &repo.branch {
            env.insert("CUMULUSCI_REPO_BRANCH".to_string(), branch.clone());
        }
        if let Some(url) = &repo.url {
            env.insert("CUMULUSCI_REPO_URL".to_string(), url.clone());
        }

        Self {
            root: root.to_path_buf(),
            env,
        }
    }

    pub fn cci<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new("cci", args).envs(&self.env).cwd(&self.root)
    }

    pub fn sf<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new("sf", args).cwd(&self.root)
    }

    pub fn cumulusci_yml(&self) -> PathBuf {
        self.root.join(CUMULUSCI_YML)
    }

    pub fn load_cumulusci(&self) -> Result<YamlValue> {
        let path = self.cumulusci_yml();
        if !path.exists() {
            return Ok(YamlValue::Null);
        }
        serde_yaml::from_str(&read_to_string(&path)?)
            .with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn save_cumulusci(&self, config: &YamlValue) -> Result<()> {
        let path = self.cumulusci_yml();
        let raw = serde_yaml::to_string(config).context("Failed to serialize cumulusci.yml")?;
        std::fs::write(&path, raw).with_context(|| format!("Failed to write {:?}", path))
    }

    pub fn project_name(&self) -> Result<String> {
        let config = self.load_cumulusci()?;
        Ok(crate::project::lookup_yaml(&config, "project.name")
            .and_then(|v| v.as_str())
            .unwrap_or("Project")
            .to_string())
    }
}
