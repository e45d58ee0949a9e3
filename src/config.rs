// src/config.rs

//! Service credentials ("keychain").
//!
//! D2X Cloud credentials are stored per service in
//! `~/.d2x/services.yaml`:
//!
//! services:
//!   d2x:
//!     base_url: https://d2xapi.onrender.com
//!     tenant: acme-corp
//!     token: { access_token: ..., refresh_token: ..., expires_at: ... }
//!
//! In CI the same service can be supplied as JSON through
//! `CUMULUSCI_SERVICE_d2x` / `CUMULUSCI_SERVICE_d2x_worker`. Environment
//! services always win and are never written back to disk.

use crate::error::ConfigError;
use crate::util::{ensure_dir, read_to_string};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const KEYCHAIN_FILE: &str = "services.yaml";

/// The two D2X Cloud services the CLI talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ServiceKind {
    /// User-facing D2X Cloud API.
    D2x,
    /// Worker API used when running jobs.
    D2xWorker,
}

impl ServiceKind {
    /// Key used in services.yaml and in the environment variable name.
    pub fn key(self) -> &'static str {
        match self {
            ServiceKind::D2x => "d2x",
            ServiceKind::D2xWorker => "d2x_worker",
        }
    }

    pub fn env_var(self) -> String {
        format!("CUMULUSCI_SERVICE_{}", self.key())
    }
}

/// OAuth token as returned by Auth0, plus the computed `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthToken {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Unix timestamp (seconds) when the access token expires.
    #[serde(default)]
    pub expires_at: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Anything else the issuer returns is preserved as-is.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl OAuthToken {
    /// True if the token is expired or expires within `window_secs` of `now`.
    pub fn expires_within(&self, now: i64, window_secs: i64) -> bool {
        self.expires_at <= now + window_secs
    }
}

/// One configured service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the D2X Cloud API, without trailing slash.
    pub base_url: String,

    /// Tenant slug, for example `acme-corp`.
    pub tenant: String,

    /// Accepts either a token object or a JSON-encoded token string
    /// (the shape CumulusCI services use).
    #[serde(deserialize_with = "token_from_string_or_object")]
    pub token: OAuthToken,
}

fn token_from_string_or_object<'de, D>(deserializer: D) -> std::result::Result<OAuthToken, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawToken {
        Encoded(String),
        Object(OAuthToken),
    }

    match RawToken::deserialize(deserializer)? {
        RawToken::Encoded(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        RawToken::Object(t) => Ok(t),
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeychainFile {
    #[serde(default)]
    services: BTreeMap<String, ServiceConfig>,
}

/// File-backed store of service credentials.
#[derive(Debug)]
pub struct Keychain {
    path: PathBuf,
    file: KeychainFile,
}

impl Keychain {
    /// Load the keychain from the default location (missing file = empty).
    pub fn load() -> Result<Self> {
        Self::load_from(&d2x_home().join(KEYCHAIN_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let raw = read_to_string(path)?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("Failed to parse keychain file {:?}", path))?
        } else {
            KeychainFile::default()
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Resolve a service: environment first, then the keychain file.
    pub fn get_service(&self, kind: ServiceKind) -> Result<ServiceConfig> {
        self.resolve_service(kind, std::env::var(kind.env_var()).ok())
    }

    fn resolve_service(&self, kind: ServiceKind, env_value: Option<String>) -> Result<ServiceConfig> {
        if let Some(raw) = env_value {
            let mut service: ServiceConfig = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a valid service JSON", kind.env_var()))?;
            service.base_url = service.base_url.trim_end_matches('/').to_string();
            return Ok(service);
        }

        self.file.services.get(kind.key()).cloned().ok_or_else(|| {
            ConfigError::new(format!(
                "Service '{}' is not configured. Run `d2x service connect {}` first.",
                kind.key(),
                kind.key().replace('_', "-")
            ))
            .into()
        })
    }

    /// True when the service comes from the environment and must not be saved.
    pub fn is_from_env(kind: ServiceKind) -> bool {
        std::env::var_os(kind.env_var()).is_some()
    }

    pub fn set_service(&mut self, kind: ServiceKind, mut service: ServiceConfig) {
        service.base_url = service.base_url.trim_end_matches('/').to_string();
        self.file.services.insert(kind.key().to_string(), service);
    }

    pub fn remove_service(&mut self, kind: ServiceKind) -> bool {
        self.file.services.remove(kind.key()).is_some()
    }

    /// Write the keychain back to disk (owner-only permissions on unix).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir(parent)?;
        }

        let raw = serde_yaml::to_string(&self.file).context("Failed to serialize keychain")?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write keychain file {:?}", self.path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict permissions on {:?}", self.path))?;
        }

        Ok(())
    }
}

/// Directory holding the keychain and the version-check timestamp.
///
/// `D2X_HOME` overrides; otherwise `~/.d2x`.
pub fn d2x_home() -> PathBuf {
    if let Ok(dir) = std::env::var("D2X_HOME") {
        return PathBuf::from(dir);
    }

    match dirs::home_dir() {
        Some(home) => home.join(".d2x"),
        None => PathBuf::from(".d2x"),
    }
}
