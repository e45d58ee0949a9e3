// src/worker.rs

//! Worker API client used by `d2x job run`.
//!
//! After `job_start` every report is signed with the per-job ed25519 key;
//! the hex signature of the exact body bytes goes in `X-D2X-Signature`.

use crate::api::{check_status, load_service};
use crate::auth::http_client;
use crate::config::ServiceKind;
use crate::engine::job::Job;

use anyhow::{bail, Context, Result};
use base64::Engine as _;
use ed25519_dalek::{Signer, SigningKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const SIGNATURE_HEADER: &str = "X-D2X-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

/// Body of a job status report.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub log: Option<String>,
    pub exception: Option<String>,
}

impl JobStatusUpdate {
    pub fn new(status: JobStatus, log: impl Into<String>) -> Self {
        Self {
            status,
            log: Some(log.into()),
            exception: None,
        }
    }

    pub fn failed(log: impl Into<String>, exception: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            log: Some(log.into()),
            exception: Some(exception.into()),
        }
    }
}

/// Scratch org details reported once the org exists.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScratchOrgCompletion {
    pub org_id: String,
    pub instance_url: String,
    pub username: String,
    pub user_id: Option<String>,
    pub sfdx_auth_url: Option<String>,
}

/// Response of `job_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStart {
    pub signing_key: String,
    pub job: Job,
}

/// Signs report bodies with the job's ed25519 key.
pub struct JobSigner {
    key: SigningKey,
}

impl JobSigner {
    /// Build from the base64 encoded 32-byte seed returned by `job_start`.
    pub fn from_base64(seed: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(seed.trim())
            .context("Signing key is not valid base64")?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Signing key must be 32 bytes, got {}", bytes.len()))?;

        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn sign(&self, body: &[u8]) -> String {
        hex::encode(self.key.sign(body).to_bytes())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerClient {
    base_url: String,
    tenant: String,
    token: String,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: &str, token: &str, tenant: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: tenant.to_string(),
            token: token.to_string(),
            http: http_client()?,
        })
    }

    /// Client for the configured `d2x_worker` service.
    pub async fn from_keychain() -> Result<Self> {
        let service = load_service(ServiceKind::D2xWorker).await?;
        Self::new(&service.base_url, &service.token.access_token, &service.tenant)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/d2x/{}/{}", self.base_url, self.tenant, path)
    }

    async fn post(&self, path: &str, body: &Value, signer: Option<&JobSigner>) -> Result<reqwest::Response> {
        let bytes = serde_json::to_vec(body)?;
        let mut req = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(signer) = signer {
            req = req.header(SIGNATURE_HEADER, signer.sign(&bytes));
        }

        let resp = req
            .body(bytes)
            .send()
            .await
            .with_context(|| format!("Failed to call worker API ({})", path))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            check_status(status, &text)?;
            bail!("Worker API returned {} for {}", status, path);
        }
        Ok(resp)
    }

    /// Claim a queued job; returns its signing key and details.
    pub async fn job_start(&self, job_id: &str) -> Result<JobStart> {
        let resp = self.post(&format!("jobs/{}/start", job_id), &json!({}), None).await?;
        resp.json().await.context("Invalid job start response")
    }

    pub async fn job_status_update(
        &self,
        signer: &JobSigner,
        job_id: &str,
        update: &JobStatusUpdate,
    ) -> Result<()> {
        let body = serde_json::to_value(update)?;
        self.post(&format!("jobs/{}/status", job_id), &body, Some(signer))
            .await?;
        Ok(())
    }

    /// Zip archive of the repository at `commit`.
    pub async fn job_repo_contents(
        &self,
        signer: &JobSigner,
        job_id: &str,
        repo_id: &str,
        commit: &str,
    ) -> Result<Vec<u8>> {
        let body = json!({ "repo": { "id": repo_id }, "ref": { "commit": commit } });
        let resp = self
            .post(&format!("jobs/{}/repo-contents", job_id), &body, Some(signer))
            .await?;
        Ok(resp
            .bytes()
            .await
            .context("Failed to download repository contents")?
            .to_vec())
    }

    pub async fn scratch_create_request_complete(
        &self,
        signer: &JobSigner,
        request_id: &str,
        completion: &ScratchOrgCompletion,
    ) -> Result<Value> {
        let body = serde_json::to_value(completion)?;
        let resp = self
            .post(
                &format!("scratch-create-requests/{}/complete", request_id),
                &body,
                Some(signer),
            )
            .await?;
        let text = resp.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("Invalid scratch completion response")
    }
}
