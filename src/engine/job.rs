// src/engine/job.rs

//! Job document as returned by the worker API on `job_start`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum JobRef {
    Commit(String),
    Tag(String),
    Branch(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedRef {
    #[serde(default)]
    pub commit: Option<CommitRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoOwner {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRepo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub org: Option<RepoOwner>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchCreateRequest {
    pub id: String,
    #[serde(default)]
    pub org_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub scratchdef_path: Option<String>,
    pub cumulusci_config_name: String,
    #[serde(default)]
    pub days: Option<u32>,
}

impl ScratchCreateRequest {
    pub fn is_pending(&self) -> bool {
        self.status == "pending"
    }

    /// Local org name for this request, unique per job.
    pub fn org_name_for(&self, job_id: &str) -> String {
        match self.org_name.as_deref() {
            Some(name) if name.contains("{JOB_ID}") => name.replace("{JOB_ID}", job_id),
            Some(name) if !name.is_empty() => format!("{}-{}", name, job_id),
            _ => format!("job-{}", job_id),
        }
    }
}

/// One entry of the job's `run` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: Value,
}

impl RunStep {
    pub fn step_type(&self) -> Option<&str> {
        self.config.get("type").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyResolution {
    #[serde(default)]
    pub dependencies: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyResolutionRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<DependencyResolution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(rename = "ref", default)]
    pub git_ref: Option<JobRef>,

    #[serde(default)]
    pub resolved_ref: Option<ResolvedRef>,

    #[serde(default)]
    pub repo: Option<JobRepo>,

    #[serde(default)]
    pub scratch_create_request: Option<ScratchCreateRequest>,

    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub devhub_access_token: Option<String>,
    #[serde(default)]
    pub devhub_instance_url: Option<String>,

    #[serde(default)]
    pub plan_version: Option<Value>,

    #[serde(default)]
    pub run: Vec<RunStep>,

    #[serde(default)]
    pub dependency_resolution_request: Option<DependencyResolutionRequest>,

    /// Recorded step summary (JSON-encoded list).
    #[serde(default)]
    pub steps: Option<String>,
}

impl Job {
    /// Commit sha to check out: an explicit commit ref wins over the
    /// server-resolved one.
    pub fn commit_sha(&self) -> Result<String> {
        if let Some(JobRef::Commit(sha)) = &self.git_ref {
            return Ok(sha.clone());
        }
        match self
            .resolved_ref
            .as_ref()
            .and_then(|r| r.commit.as_ref())
        {
            Some(commit) => Ok(commit.sha.clone()),
            None => bail!("Job {} has no resolved commit", self.id),
        }
    }

    pub fn branch(&self) -> Option<&str> {
        match &self.git_ref {
            Some(JobRef::Branch(b)) => Some(b),
            _ => None,
        }
    }

    pub fn dependencies(&self) -> &[Value] {
        self.dependency_resolution_request
            .as_ref()
            .and_then(|d| d.result.as_ref())
            .map(|r| r.dependencies.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_plan_version(&self) -> bool {
        self.plan_version.as_ref().is_some_and(|v| !v.is_null())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_ref_wins_over_resolved() {
        let job: Job = serde_json::from_value(json!({
            "id": "j1",
            "ref": {"commit": "abc"},
            "resolved_ref": {"commit": {"sha": "def"}}
        }))
        .unwrap();
        assert_eq!(job.commit_sha().unwrap(), "abc");
    }

    #[test]
    fn branch_ref_uses_resolved_commit() {
        let job: Job = serde_json::from_value(json!({
            "id": "j1",
            "ref": {"branch": "main"},
            "resolved_ref": {"commit": {"sha": "def"}}
        }))
        .unwrap();
        assert_eq!(job.commit_sha().unwrap(), "def");
        assert_eq!(job.branch(), Some("main"));
    }

    #[test]
    fn missing_commit_is_an_error() {
        let job: Job = serde_json::from_value(json!({"id": "j1", "ref": {"tag": "v1"}})).unwrap();
        assert!(job.commit_sha().is_err());
    }

    #[test]
    fn scratch_org_names_are_unique_per_job() {
        let mut req: ScratchCreateRequest = serde_json::from_value(json!({
            "id": "s1",
            "org_name": "job-{JOB_ID}",
            "status": "pending",
            "cumulusci_config_name": "dev"
        }))
        .unwrap();
        assert_eq!(req.org_name_for("j9"), "job-j9");

        req.org_name = Some("feature".into());
        assert_eq!(req.org_name_for("j9"), "feature-j9");
        assert!(req.is_pending());
    }

    #[test]
    fn null_plan_version_is_absent() {
        let job: Job = serde_json::from_value(json!({"id": "j1", "plan_version": null})).unwrap();
        assert!(!job.has_plan_version());
        assert!(job.dependencies().is_empty());
    }
}
