// src/toolchain.rs

//! External tools (`cci`, `sf`, `snowfakery`) behind one seam so job runs can
//! be exercised without the real binaries.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command as TokioCommand;

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.insert(key.to_string(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Human readable command line (env values are never shown).
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            if arg.contains(' ') {
                out.push('"');
                out.push_str(arg);
                out.push('"');
            } else {
                out.push_str(arg);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait Toolchain: Send + Sync {
    /// Run to completion capturing stdout / stderr.
    async fn output(&self, inv: &Invocation) -> Result<ProcessOutput>;

    /// Run with output streamed to the terminal.
    async fn status(&self, inv: &Invocation) -> Result<ProcessOutput>;

    /// Run and fail unless the command exits successfully.
    ///
    /// With `verbose` the output streams live; otherwise it is captured and
    /// the tail is printed when the command fails.
    async fn run_checked(&self, inv: &Invocation, verbose: bool) -> Result<ProcessOutput> {
        tracing::debug!(command = %inv.display(), "running");
        let out = if verbose {
            self.status(inv).await?
        } else {
            self.output(inv).await?
        };

        if !out.success {
            if !verbose {
                for line in tail(&out.stderr, 20).into_iter().chain(tail(&out.stdout, 20)) {
                    eprintln!("  {}", line);
                }
            }
            bail!(
                "Command `{}` failed with exit code {}",
                inv.display(),
                out.code.map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
            );
        }
        Ok(out)
    }
}

fn tail(text: &str, n: usize) -> Vec<&str> {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].to_vec()
}

/// Runs real processes with tokio.
#[derive(Debug, Default, Clone)]
pub struct SystemToolchain;

impl SystemToolchain {
    fn command(inv: &Invocation) -> TokioCommand {
        let mut cmd = TokioCommand::new(&inv.program);
        cmd.args(&inv.args);
        for (k, v) in &inv.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &inv.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

#[async_trait]
impl Toolchain for SystemToolchain {
    async fn output(&self, inv: &Invocation) -> Result<ProcessOutput> {
        let mut cmd = Self::command(inv);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", inv.program))?;
        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed while waiting for `{}`", inv.program))?;

        Ok(ProcessOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn status(&self, inv: &Invocation) -> Result<ProcessOutput> {
        let mut cmd = Self::command(inv);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());

        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to run `{}`", inv.program))?;

        Ok(ProcessOutput {
            success: status.success(),
            code: status.code(),
            ..Default::default()
        })
    }
}
