// src/api.rs

//! D2X Cloud REST client.
//!
//! Tenanted resources live under `{base_url}/d2x/{tenant}/{resource}`;
//! a handful of account-level resources sit directly under `{base_url}`.

use crate::auth::{http_client, validate_service, OAuthApp};
use crate::config::{Keychain, ServiceConfig, ServiceKind};

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors mapped from D2X Cloud HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Token expired or invalid, use `d2x service connect d2x` to re-authenticate. Message: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unexpected response {status}: {body}")]
    Unexpected { status: u16, body: String },

    #[error("{0}")]
    Config(String),
}

/// Resources exposed by the D2X Cloud API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiObject {
    Application,
    GithubRepo,
    GithubOrg,
    Job,
    Plan,
    PlanVersion,
    Org,
    OrgConnectRequest,
    OrgUser,
    OrgUserCredential,
    OrgUserGrant,
    ScratchCreateRequest,
    ScratchDeleteRequest,
    Tenant,
    TenantUserRole,
    User,
}

impl ApiObject {
    pub const ALL: [ApiObject; 16] = [
        ApiObject::Application,
        ApiObject::GithubRepo,
        ApiObject::GithubOrg,
        ApiObject::Job,
        ApiObject::Plan,
        ApiObject::PlanVersion,
        ApiObject::Org,
        ApiObject::OrgConnectRequest,
        ApiObject::OrgUser,
        ApiObject::OrgUserCredential,
        ApiObject::OrgUserGrant,
        ApiObject::ScratchCreateRequest,
        ApiObject::ScratchDeleteRequest,
        ApiObject::Tenant,
        ApiObject::TenantUserRole,
        ApiObject::User,
    ];

    /// URL path segment for the resource.
    pub fn path(self) -> &'static str {
        match self {
            ApiObject::Application => "applications",
            ApiObject::GithubRepo => "github-repos",
            ApiObject::GithubOrg => "github-orgs",
            ApiObject::Job => "jobs",
            ApiObject::Plan => "plans",
            ApiObject::PlanVersion => "versions",
            ApiObject::Org => "orgs",
            ApiObject::OrgConnectRequest => "org-connect-requests",
            ApiObject::OrgUser => "org-users",
            ApiObject::OrgUserCredential => "org-user-credentials",
            ApiObject::OrgUserGrant => "org-user-grants",
            ApiObject::ScratchCreateRequest => "scratch-create-requests",
            ApiObject::ScratchDeleteRequest => "scratch-delete-requests",
            ApiObject::Tenant => "tenants",
            ApiObject::TenantUserRole => "tenant-user-roles",
            ApiObject::User => "users",
        }
    }

    /// Model name, as used in seed data `_table` values.
    pub fn model_name(self) -> &'static str {
        match self {
            ApiObject::Application => "Application",
            ApiObject::GithubRepo => "GithubRepo",
            ApiObject::GithubOrg => "GithubOrg",
            ApiObject::Job => "Job",
            ApiObject::Plan => "Plan",
            ApiObject::PlanVersion => "PlanVersion",
            ApiObject::Org => "Org",
            ApiObject::OrgConnectRequest => "OrgConnectRequest",
            ApiObject::OrgUser => "OrgUser",
            ApiObject::OrgUserCredential => "OrgUserCredential",
            ApiObject::OrgUserGrant => "OrgUserGrant",
            ApiObject::ScratchCreateRequest => "ScratchCreateRequest",
            ApiObject::ScratchDeleteRequest => "ScratchDeleteRequest",
            ApiObject::Tenant => "Tenant",
            ApiObject::TenantUserRole => "TenantUserRole",
            ApiObject::User => "User",
        }
    }

    pub fn from_model_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.model_name() == name)
    }

    fn is_tenanted(self) -> bool {
        !matches!(
            self,
            ApiObject::Application | ApiObject::Tenant | ApiObject::TenantUserRole | ApiObject::User
        )
    }
}

/// Parent ids for nested resources (`plan_id` for plan versions).
pub type Parents = BTreeMap<String, String>;

/// Map a foreign-key field name to its model name.
///
/// `plan_version_id` → `PlanVersion`, `repo_id` → `GithubRepo`.
pub fn fk_field_to_model(field_name: &str) -> String {
    let base = field_name.strip_suffix("_id").unwrap_or(field_name);
    let model: String = base
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect();

    if model == "Repo" {
        "GithubRepo".to_string()
    } else {
        model
    }
}

/// Client for the user-facing D2X Cloud API.
#[derive(Debug, Clone)]
pub struct D2xApiClient {
    base_url: String,
    tenant: String,
    token: String,
    http: reqwest::Client,
}

impl D2xApiClient {
    pub fn new(base_url: &str, token: &str, tenant: &str) -> Result<Self> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            tenant: tenant.to_string(),
            token: token.to_string(),
            http: http_client()?,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Build the URL for a resource collection (plus optional extra path).
    pub fn object_url(
        &self,
        obj: ApiObject,
        parents: Option<&Parents>,
        extra_path: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut url = if !obj.is_tenanted() {
            format!("{}/{}", self.base_url, obj.path())
        } else if obj == ApiObject::PlanVersion {
            let plan_id = parents.and_then(|p| p.get("plan_id")).ok_or_else(|| {
                ApiError::Config("PlanVersion requires a plan_id in parents".to_string())
            })?;
            format!(
                "{}/d2x/{}/plans/{}/{}",
                self.base_url,
                self.tenant,
                plan_id,
                obj.path()
            )
        } else {
            format!("{}/d2x/{}/{}", self.base_url, self.tenant, obj.path())
        };

        if let Some(extra) = extra_path.filter(|e| !e.is_empty()) {
            url.push('/');
            url.push_str(extra.trim_start_matches('/'));
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        let resp = req.send().await.context("Failed to call D2X Cloud API")?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .context("Failed to read D2X Cloud API response")?;

        check_status(status, &text)?;

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).context("D2X Cloud API returned invalid JSON")
    }

    /// List a resource collection with optional query parameters.
    pub async fn list(
        &self,
        obj: ApiObject,
        parents: Option<&Parents>,
        query: &[(&str, String)],
    ) -> Result<Vec<Value>> {
        let url = self.object_url(obj, parents, None)?;
        tracing::debug!(%url, "list");
        let value = self.send(self.request(Method::GET, &url).query(query)).await?;

        match value {
            Value::Array(items) => Ok(items),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    pub async fn read(
        &self,
        obj: ApiObject,
        id: &str,
        parents: Option<&Parents>,
        extra_path: Option<&str>,
    ) -> Result<Value> {
        let path = match extra_path {
            Some(extra) if !extra.is_empty() => format!("{}/{}", id, extra),
            _ => id.to_string(),
        };
        let url = self.object_url(obj, parents, Some(&path))?;
        tracing::debug!(%url, "read");
        self.send(self.request(Method::GET, &url)).await
    }

    pub async fn create(
        &self,
        obj: ApiObject,
        data: &Value,
        parents: Option<&Parents>,
        extra_path: Option<&str>,
    ) -> Result<Value> {
        let url = self.object_url(obj, parents, extra_path)?;
        tracing::debug!(%url, "create");
        self.send(self.request(Method::POST, &url).json(data)).await
    }

    pub async fn update(
        &self,
        obj: ApiObject,
        id: &str,
        data: &Value,
        parents: Option<&Parents>,
    ) -> Result<Value> {
        let url = self.object_url(obj, parents, Some(id))?;
        tracing::debug!(%url, "update");
        self.send(self.request(Method::PUT, &url).json(data)).await
    }

    pub async fn delete(&self, obj: ApiObject, id: &str, parents: Option<&Parents>) -> Result<Value> {
        let url = self.object_url(obj, parents, Some(id))?;
        tracing::debug!(%url, "delete");
        self.send(self.request(Method::DELETE, &url)).await
    }

    /// Frontdoor login URL for an org user, optionally landing on `path`.
    pub async fn org_login(&self, org_user_id: &str, path: Option<&str>) -> Result<Option<String>> {
        let url = format!("{}/d2x/{}/org-login/{}", self.base_url, self.tenant, org_user_id);
        let mut req = self.request(Method::GET, &url);
        if let Some(p) = path {
            req = req.query(&[("redirect_path", p)]);
        }

        let value = self.send(req).await?;
        Ok(value
            .get("login_url")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    /// Websocket URL streaming a job's log.
    pub fn job_log_ws_url(&self, job_id: &str) -> String {
        convert_url_to_websocket(&format!(
            "{}/d2x/{}/jobs/{}/log",
            self.base_url, self.tenant, job_id
        ))
    }
}

/// Turn an HTTP status into an `ApiError` (success passes through).
pub fn check_status(status: StatusCode, body: &str) -> Result<(), ApiError> {
    if status.is_success() {
        return Ok(());
    }

    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("detail"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());

    Err(match status.as_u16() {
        400 => ApiError::BadRequest(message),
        401 => ApiError::Unauthorized(message),
        403 => ApiError::Forbidden(message),
        404 => ApiError::NotFound(message),
        500 => ApiError::Server(message),
        code => ApiError::Unexpected {
            status: code,
            body: body.to_string(),
        },
    })
}

pub fn convert_url_to_websocket(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

/// Load a service from the keychain, refreshing (and persisting) its token
/// when needed.
pub async fn load_service(kind: ServiceKind) -> Result<ServiceConfig> {
    let mut keychain = Keychain::load()?;
    let service = keychain.get_service(kind)?;

    let (changed, service) =
        validate_service(&http_client()?, &OAuthApp::for_service(kind), service)
            .await
            .with_context(|| format!("Failed to validate the {} service token", kind.key()))?;

    if changed && !Keychain::is_from_env(kind) {
        keychain.set_service(kind, service.clone());
        keychain.save()?;
        tracing::debug!(service = kind.key(), "saved refreshed token");
    }
    Ok(service)
}

/// API client for the configured `d2x` service.
pub async fn get_d2x_api_client() -> Result<D2xApiClient> {
    let service = load_service(ServiceKind::D2x).await?;
    D2xApiClient::new(&service.base_url, &service.token.access_token, &service.tenant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base: &str) -> D2xApiClient {
        D2xApiClient::new(base, "tok", "acme").unwrap()
    }

    #[test]
    fn urls_follow_tenancy() {
        let c = client("https://api.example.com/");
        assert_eq!(
            c.object_url(ApiObject::Tenant, None, None).unwrap(),
            "https://api.example.com/tenants"
        );
        assert_eq!(
            c.object_url(ApiObject::Job, None, Some("j1")).unwrap(),
            "https://api.example.com/d2x/acme/jobs/j1"
        );

        let mut parents = Parents::new();
        parents.insert("plan_id".into(), "p1".into());
        assert_eq!(
            c.object_url(ApiObject::PlanVersion, Some(&parents), None).unwrap(),
            "https://api.example.com/d2x/acme/plans/p1/versions"
        );
    }

    #[test]
    fn plan_versions_need_a_plan() {
        let err = client("https://x")
            .object_url(ApiObject::PlanVersion, None, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }

    #[test]
    fn foreign_keys_map_to_models() {
        assert_eq!(fk_field_to_model("plan_version_id"), "PlanVersion");
        assert_eq!(fk_field_to_model("repo_id"), "GithubRepo");
        assert_eq!(fk_field_to_model("org_user_id"), "OrgUser");
        assert_eq!(fk_field_to_model("tenant"), "Tenant");
    }

    #[test]
    fn model_names_resolve_to_objects() {
        assert_eq!(ApiObject::from_model_name("PlanVersion"), Some(ApiObject::PlanVersion));
        assert_eq!(ApiObject::from_model_name("Nope"), None);
    }

    #[test]
    fn websocket_urls_swap_scheme() {
        assert_eq!(convert_url_to_websocket("https://a/b"), "wss://a/b");
        assert_eq!(convert_url_to_websocket("http://a/b"), "ws://a/b");
    }

    #[test]
    fn statuses_map_to_errors() {
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN, r#"{"message": "expired"}"#),
            Err(ApiError::Forbidden(m)) if m == "expired"
        ));
        assert!(matches!(check_status(StatusCode::NOT_FOUND, ""), Err(ApiError::NotFound(_))));
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY, "x"),
            Err(ApiError::Unexpected { status: 502, .. })
        ));
        assert!(check_status(StatusCode::CREATED, "").is_ok());
    }

    #[tokio::test]
    async fn list_sends_bearer_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/d2x/acme/jobs"))
            .and(header("authorization", "Bearer tok"))
            .and(query_param("status__in", "failed"))
            .and(query_param("repo__name", "widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "j1"}])))
            .mount(&server)
            .await;

        let jobs = client(&server.uri())
            .list(
                ApiObject::Job,
                None,
                &[
                    ("status__in", "failed".to_string()),
                    ("repo__name", "widgets".to_string()),
                ],
            )
            .await
            .unwrap();
        assert_eq!(jobs, vec![json!({"id": "j1"})]);
    }

    #[tokio::test]
    async fn read_with_extra_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/d2x/acme/org-users/u1/credential"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sfdx_auth_url": "force://x"})))
            .mount(&server)
            .await;

        let cred = client(&server.uri())
            .read(ApiObject::OrgUser, "u1", None, Some("credential"))
            .await
            .unwrap();
        assert_eq!(cred["sfdx_auth_url"], "force://x");
    }

    #[tokio::test]
    async fn not_found_surfaces_as_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/d2x/acme/jobs/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .read(ApiObject::Job, "missing", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn org_login_passes_redirect_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/d2x/acme/org-login/u1"))
            .and(query_param("redirect_path", "/lightning/setup"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login_url": "https://login"})))
            .mount(&server)
            .await;

        let url = client(&server.uri())
            .org_login("u1", Some("/lightning/setup"))
            .await
            .unwrap();
        assert_eq!(url.as_deref(), Some("https://login"));
    }

    #[tokio::test]
    async fn create_posts_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/d2x/acme/scratch-create-requests"))
            .and(wiremock::matchers::body_json(json!({"cumulusci_config_name": "dev"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "s1"})))
            .mount(&server)
            .await;

        let created = client(&server.uri())
            .create(
                ApiObject::ScratchCreateRequest,
                &json!({"cumulusci_config_name": "dev"}),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(created["id"], "s1");
    }

    #[tokio::test]
    async fn update_puts_to_record_url() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/d2x/acme/plans/p1"))
            .and(wiremock::matchers::body_json(json!({"title": "Install"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "p1", "title": "Install"})))
            .expect(1)
            .mount(&server)
            .await;

        let updated = client(&server.uri())
            .update(ApiObject::Plan, "p1", &json!({"title": "Install"}), None)
            .await
            .unwrap();
        assert_eq!(updated["title"], "Install");
    }

    #[tokio::test]
    async fn delete_targets_record_and_accepts_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/d2x/acme/plans/p1/versions/v1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut parents = Parents::new();
        parents.insert("plan_id".into(), "p1".into());
        let deleted = client(&server.uri())
            .delete(ApiObject::PlanVersion, "v1", Some(&parents))
            .await
            .unwrap();
        assert_eq!(deleted, Value::Null);
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 64\r\n\r\n{\"id\": ",
                )
                .await
                .unwrap();
        });

        let err = client(&format!("http://{}", addr))
            .read(ApiObject::Job, "j1", None, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read D2X Cloud API response"));
    }
}
