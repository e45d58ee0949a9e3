// src/auth.rs

//! D2X Cloud authentication (Auth0).
//!
//! Tokens are obtained with the OAuth device-code flow and refreshed with
//! the refresh-token grant when they are close to expiry.

use crate::config::{OAuthToken, ServiceConfig, ServiceKind};
use crate::util::{mask, now_ts};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};

const AUTH0_ISSUER: &str = "https://dev-8isvmuklk1x3d5o5.us.auth0.com";
const D2X_CLIENT_ID: &str = "spCq5hYVUCjQocuVBLSsidcdduKlMf8r";
const D2X_SCOPE: &str = "openid profile email offline_access";
const DEFAULT_AUDIENCE: &str = "https://d2xapi.onrender.com";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Extra polling delay requested by a `slow_down` response.
const SLOW_DOWN_STEP_SECS: u64 = 5;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_WINDOW_SECS: i64 = 1800;

/// OAuth application settings for one service.
#[derive(Debug, Clone)]
pub struct OAuthApp {
    pub client_id: String,
    pub scope: String,
    pub audience: String,
    /// Issuer base URL, e.g. `https://tenant.auth0.com`.
    pub issuer: String,
}

impl OAuthApp {
    /// App settings for a service, honouring `D2X_AUDIENCE_URL` and `D2X_AUTH_URL`.
    pub fn for_service(kind: ServiceKind) -> Self {
        let audience =
            std::env::var("D2X_AUDIENCE_URL").unwrap_or_else(|_| DEFAULT_AUDIENCE.to_string());
        let issuer = std::env::var("D2X_AUTH_URL").unwrap_or_else(|_| AUTH0_ISSUER.to_string());

        let audience = match kind {
            ServiceKind::D2x => audience,
            ServiceKind::D2xWorker => format!("{}/d2x-worker", audience.trim_end_matches('/')),
        };

        Self {
            client_id: D2X_CLIENT_ID.to_string(),
            scope: D2X_SCOPE.to_string(),
            audience,
            issuer: issuer.trim_end_matches('/').to_string(),
        }
    }

    fn device_code_url(&self) -> String {
        format!("{}/oauth/device/code", self.issuer)
    }

    fn token_url(&self) -> String {
        format!("{}/oauth/token", self.issuer)
    }

    fn userinfo_url(&self) -> String {
        format!("{}/userinfo", self.issuer)
    }
}

#[derive(Debug, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    1
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// Interactive device-code authorization. Returns the new token.
pub async fn get_oauth_device_flow_token(app: &OAuthApp) -> Result<OAuthToken> {
    let client = http_client()?;
    let code = request_device_code(&client, app).await?;

    eprintln!("Enter this one-time code: {}", code.user_code);
    eprintln!(
        "Copy the code then press Enter to continue to log in to your account in your default browser..."
    );
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("Failed to read from stdin")?;

    eprintln!("Opening {} in your default browser...", code.verification_uri);
    if let Err(e) = open::that(&code.verification_uri) {
        tracing::warn!(error = %e, "could not open browser; visit the URL manually");
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    eprintln!("Polling server for authorization...");
    let token = poll_for_token(&client, app, &code).await?;
    eprintln!(
        "Successfully authorized OAuth token ({})",
        mask(&token.access_token)
    );
    Ok(token)
}

/// Start a device authorization.
pub async fn request_device_code(client: &reqwest::Client, app: &OAuthApp) -> Result<DeviceCode> {
    let resp = client
        .post(app.device_code_url())
        .form(&[
            ("client_id", app.client_id.as_str()),
            ("scope", app.scope.as_str()),
            ("audience", app.audience.as_str()),
        ])
        .send()
        .await
        .context("Failed to call device code endpoint")?;

    if resp.status() != reqwest::StatusCode::OK {
        bail!("Failed to get device code: {}", resp.status());
    }

    resp.json::<DeviceCode>()
        .await
        .context("Device code response was not valid JSON")
}

/// Poll the token endpoint until the user approves, denies, or the code expires.
pub async fn poll_for_token(
    client: &reqwest::Client,
    app: &OAuthApp,
    code: &DeviceCode,
) -> Result<OAuthToken> {
    let started = Instant::now();
    let mut interval = code.interval;

    while started.elapsed() < Duration::from_secs(code.expires_in) {
        let resp = client
            .post(app.token_url())
            .form(&[
                ("grant_type", DEVICE_CODE_GRANT),
                ("device_code", code.device_code.as_str()),
                ("client_id", app.client_id.as_str()),
            ])
            .send()
            .await
            .context("Failed to poll token endpoint")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if status.is_success() {
            return token_from_response(&text);
        }

        let err: OAuthErrorBody = serde_json::from_str(&text)
            .with_context(|| format!("Unexpected token endpoint response: {} {}", status, text))?;

        match err.error.as_str() {
            "authorization_pending" => {}
            "slow_down" => interval += SLOW_DOWN_STEP_SECS,
            other => bail!(
                "Device authorization failed: {}{}",
                other,
                err.error_description
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default()
            ),
        }

        tokio::time::sleep(Duration::from_secs(interval)).await;
    }

    bail!("Device authorization timed out before it was approved")
}

fn token_from_response(text: &str) -> Result<OAuthToken> {
    let mut token: OAuthToken =
        serde_json::from_str(text).context("Token response was not valid JSON")?;
    token.expires_at = now_ts() + token.expires_in.unwrap_or(0);
    Ok(token)
}

/// Refresh the service token if it is close to expiry, then confirm it with
/// the userinfo endpoint.
///
/// Returns `true` in the first element when the token changed and should be
/// persisted.
pub async fn validate_service(
    client: &reqwest::Client,
    app: &OAuthApp,
    mut service: ServiceConfig,
) -> Result<(bool, ServiceConfig)> {
    let mut changed = false;

    if service.token.expires_within(now_ts(), REFRESH_WINDOW_SECS) {
        tracing::debug!("access token expires soon; refreshing");
        let refresh_token = service
            .token
            .refresh_token
            .clone()
            .context("Token is expired and has no refresh token; run `d2x service connect` again")?;

        let resp = client
            .post(app.token_url())
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", app.client_id.as_str()),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .context("Failed to call token refresh endpoint")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status != reqwest::StatusCode::OK {
            bail!("Failed to refresh token: {}", text);
        }

        let mut new_token = token_from_response(&text)?;
        if new_token.refresh_token.is_none() {
            new_token.refresh_token = Some(refresh_token);
        }
        service.token = new_token;
        changed = true;
    }

    let resp = client
        .get(app.userinfo_url())
        .bearer_auth(&service.token.access_token)
        .send()
        .await
        .context("Failed to call userinfo endpoint")?;

    if resp.status() != reqwest::StatusCode::OK {
        bail!("Invalid token");
    }

    Ok((changed, service))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(issuer: &str) -> OAuthApp {
        OAuthApp {
            client_id: "client".into(),
            scope: D2X_SCOPE.into(),
            audience: "https://aud".into(),
            issuer: issuer.into(),
        }
    }

    fn service(expires_at: i64) -> ServiceConfig {
        ServiceConfig {
            base_url: "https://api".into(),
            tenant: "acme".into(),
            token: OAuthToken {
                access_token: "old-access".into(),
                refresh_token: Some("old-refresh".into()),
                expires_at,
                expires_in: None,
                token_type: None,
                scope: None,
                id_token: None,
                extra: BTreeMap::new(),
            },
        }
    }

    #[test]
    fn worker_audience_is_derived() {
        let a = OAuthApp::for_service(ServiceKind::D2xWorker);
        assert!(a.audience.ends_with("/d2x-worker"));
    }

    #[tokio::test]
    async fn device_flow_polls_until_approved() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/device/code"))
            .and(body_string_contains("audience=https%3A%2F%2Faud"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "device_code": "dev-123",
                "user_code": "ABCD-EFGH",
                "verification_uri": "https://example.com/activate",
                "expires_in": 30,
                "interval": 0
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "authorization_pending"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("device_code=dev-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let client = http_client().unwrap();
        let a = app(&server.uri());
        let code = request_device_code(&client, &a).await.unwrap();
        assert_eq!(code.user_code, "ABCD-EFGH");

        let token = poll_for_token(&client, &a, &code).await.unwrap();
        assert_eq!(token.access_token, "new-access");
        assert!(token.expires_at >= now_ts() + 3500);
    }

    #[tokio::test]
    async fn device_flow_stops_on_denial() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "access_denied",
                "error_description": "User cancelled"
            })))
            .mount(&server)
            .await;

        let code = DeviceCode {
            device_code: "d".into(),
            user_code: "u".into(),
            verification_uri: "v".into(),
            expires_in: 30,
            interval: 0,
        };
        let err = poll_for_token(&http_client().unwrap(), &app(&server.uri()), &code)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    fn pending_code(expires_in: u64, interval: u64) -> DeviceCode {
        DeviceCode {
            device_code: "d".into(),
            user_code: "u".into(),
            verification_uri: "v".into(),
            expires_in,
            interval,
        }
    }

    #[tokio::test]
    async fn slow_down_backs_off_before_next_poll() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": "slow_down"
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "slow-access",
                "expires_in": 60
            })))
            .with_priority(2)
            .mount(&server)
            .await;

        let started = Instant::now();
        let token = poll_for_token(&http_client().unwrap(), &app(&server.uri()), &pending_code(60, 0))
            .await
            .unwrap();

        assert_eq!(token.access_token, "slow-access");
        assert!(started.elapsed() >= Duration::from_secs(SLOW_DOWN_STEP_SECS));
    }

    #[tokio::test]
    async fn device_flow_times_out_while_pending() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": "authorization_pending"
            })))
            .mount(&server)
            .await;

        let err = poll_for_token(&http_client().unwrap(), &app(&server.uri()), &pending_code(1, 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn rejected_refresh_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = validate_service(
            &http_client().unwrap(),
            &app(&server.uri()),
            service(now_ts() + 60),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Failed to refresh token"));
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn fresh_token_is_only_checked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer old-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sub": "u"})))
            .mount(&server)
            .await;

        let (changed, svc) = validate_service(
            &http_client().unwrap(),
            &app(&server.uri()),
            service(now_ts() + 7200),
        )
        .await
        .unwrap();

        assert!(!changed);
        assert_eq!(svc.token.access_token, "old-access");
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_and_keeps_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-access",
                "expires_in": 86400
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer fresh-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"sub": "u"})))
            .mount(&server)
            .await;

        let (changed, svc) = validate_service(
            &http_client().unwrap(),
            &app(&server.uri()),
            service(now_ts() + 60),
        )
        .await
        .unwrap();

        assert!(changed);
        assert_eq!(svc.token.access_token, "fresh-access");
        assert_eq!(svc.token.refresh_token.as_deref(), Some("old-refresh"));
    }

    #[tokio::test]
    async fn rejected_userinfo_is_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = validate_service(
            &http_client().unwrap(),
            &app(&server.uri()),
            service(now_ts() + 7200),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid token");
    }
}
