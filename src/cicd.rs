// src/cicd.rs

use crate::cli::GithubCommand;
use crate::util::ensure_dir;

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_IMAGE: &str = "ghcr.io/muselab-d2x/d2x:cumulusci-next";
pub const WORKFLOW_PATH: &str = ".github/workflows/d2x-job.yml";

/// Repository secrets referenced by the workflow.
pub const REQUIRED_SECRETS: [&str; 7] = [
    "DEV_HUB_AUTH_URL",
    "DEV_HUB_USERNAME",
    "DEV_HUB_CLIENT_ID",
    "DEV_HUB_PRIVATE_KEY",
    "D2X_TOKEN",
    "GITHUB_USERNAME",
    "GITHUB_EMAIL",
];

/// Entry point for `d2x github …`.
pub fn handle(command: GithubCommand) -> Result<()> {
    match command {
        GithubCommand::Init { image, force } => {
            let path = init(Path::new("."), image.as_deref(), force)?;
            eprintln!("Created {:?}", path);
            println!("Add these secrets to the GitHub repository:");
            for secret in REQUIRED_SECRETS {
                println!("  {}", secret);
            }
            Ok(())
        }
    }
}

/* ---------------- github init ---------------- */

pub fn init(base: &Path, image: Option<&str>, force: bool) -> Result<PathBuf> {
    let path = base.join(WORKFLOW_PATH);
    if let Some(dir) = path.parent() {
        ensure_dir(dir)?;
    }
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }

    fs::write(&path, job_workflow(image.unwrap_or(DEFAULT_IMAGE)))
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}

/* ---------------- templates ---------------- */

fn job_workflow(image: &str) -> String {
    format!(
        r#"name: D2X Job

on:
  deployment:

jobs:
  d2x-job:
    name: Run D2X Job
    runs-on: ubuntu-latest
    container:
      image: {image}
      options: --user root
    env:
      DEV_HUB_AUTH_URL: "${{{{ secrets.DEV_HUB_AUTH_URL }}}}"
      DEV_HUB_USERNAME: "${{{{ secrets.DEV_HUB_USERNAME }}}}"
      DEV_HUB_CLIENT_ID: "${{{{ secrets.DEV_HUB_CLIENT_ID }}}}"
      DEV_HUB_PRIVATE_KEY: "${{{{ secrets.DEV_HUB_PRIVATE_KEY }}}}"
      CUMULUSCI_SERVICE_d2x_worker: "${{{{ secrets.D2X_TOKEN }}}}"
      CUMULUSCI_SERVICE_github: '{{ "username": "${{{{ secrets.GITHUB_USERNAME }}}}", "token": "${{{{ secrets.GITHUB_TOKEN }}}}", "email": "${{{{ secrets.GITHUB_EMAIL }}}}" }}'
    steps:
      - name: Checkout
        uses: actions/checkout@v4

      - name: Auth to DevHub
        run: /usr/local/bin/devhub.sh

      - name: Install D2X CLI
        run: pip install d2x-cli

      - name: Run D2X Job
        run: d2x job run "${{{{ github.event.deployment.payload.job_id }}}}"
"#,
        image = image
    )
}
