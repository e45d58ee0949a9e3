// src/commands/service.rs

//! `d2x service …` and `d2x token …`.

use crate::api::load_service;
use crate::auth::{get_oauth_device_flow_token, http_client, validate_service, OAuthApp};
use crate::cli::{ServiceCommand, TokenCommand};
use crate::commands::GlobalOpts;
use crate::config::{Keychain, OAuthToken, ServiceConfig, ServiceKind};
use crate::error::UsageError;
use crate::output::{print_object, should_use_color, Table};
use crate::util::{mask, now_ts};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::json;

pub async fn handle(command: ServiceCommand, opts: GlobalOpts) -> Result<()> {
    match command {
        ServiceCommand::Connect {
            service,
            base_url,
            tenant,
            token,
        } => connect(service, &base_url, &tenant, token.as_deref()).await,
        ServiceCommand::Info { service } => info(service, opts),
        ServiceCommand::Remove { service } => remove(service),
    }
}

pub async fn handle_token(command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::AccessToken { worker } => {
            let kind = if worker {
                ServiceKind::D2xWorker
            } else {
                ServiceKind::D2x
            };
            let service = load_service(kind).await?;
            println!("Access Token: {}", service.token.access_token);
            Ok(())
        }
    }
}

/* ---------------- connect ---------------- */

async fn connect(kind: ServiceKind, base_url: &str, tenant: &str, token: Option<&str>) -> Result<()> {
    let app = OAuthApp::for_service(kind);

    let token = match token {
        Some(raw) => parse_token(raw)?,
        None => get_oauth_device_flow_token(&app).await?,
    };

    let service = ServiceConfig {
        base_url: base_url.trim_end_matches('/').to_string(),
        tenant: tenant.to_string(),
        token,
    };
    let (_, service) = validate_service(&http_client()?, &app, service)
        .await
        .context("The token could not be validated")?;

    let mut keychain = Keychain::load()?;
    keychain.set_service(kind, service);
    keychain.save()?;

    if Keychain::is_from_env(kind) {
        eprintln!(
            "Note: {} is set and takes precedence over the saved service.",
            kind.env_var()
        );
    }
    println!("Connected service {} for tenant {}", kind.key(), tenant);
    Ok(())
}

/// Accept a token given on the command line, filling in `expires_at`.
fn parse_token(raw: &str) -> Result<OAuthToken> {
    let mut token: OAuthToken = serde_json::from_str(raw)
        .map_err(|e| UsageError::new(format!("--token is not a valid token JSON: {}", e)))?;
    if token.expires_at == 0 {
        if let Some(expires_in) = token.expires_in {
            token.expires_at = now_ts() + expires_in;
        }
    }
    Ok(token)
}

/* ---------------- info / remove ---------------- */

fn info(kind: ServiceKind, opts: GlobalOpts) -> Result<()> {
    let keychain = Keychain::load()?;
    let service = keychain.get_service(kind)?;
    let source = if Keychain::is_from_env(kind) {
        kind.env_var()
    } else {
        "keychain".to_string()
    };
    let expires = DateTime::<Utc>::from_timestamp(service.token.expires_at, 0)
        .map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string());

    if opts.json {
        return print_object(&json!({
            "service": kind.key(),
            "base_url": service.base_url,
            "tenant": service.tenant,
            "access_token": mask(&service.token.access_token),
            "expires_at": expires,
            "source": source,
        }));
    }

    let mut table = Table::new(vec!["Key".into(), "Value".into()]).with_title(kind.key());
    table.add_row(vec!["base_url".into(), service.base_url.clone()]);
    table.add_row(vec!["tenant".into(), service.tenant.clone()]);
    table.add_row(vec!["access_token".into(), mask(&service.token.access_token)]);
    table.add_row(vec!["expires_at".into(), expires]);
    table.add_row(vec!["source".into(), source]);
    println!("{}", table.render(should_use_color()));
    Ok(())
}

fn remove(kind: ServiceKind) -> Result<()> {
    let mut keychain = Keychain::load()?;
    if !keychain.remove_service(kind) {
        return Err(UsageError::new(format!("Service {} is not configured", kind.key())).into());
    }
    keychain.save()?;
    println!("Removed service {}", kind.key());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_argument_gets_expiry() {
        let token = parse_token(r#"{"access_token": "abc", "expires_in": 60}"#).unwrap();
        assert!(token.expires_at >= now_ts() + 59);
    }

    #[test]
    fn explicit_expiry_is_kept() {
        let token = parse_token(r#"{"access_token": "abc", "expires_at": 5, "expires_in": 60}"#).unwrap();
        assert_eq!(token.expires_at, 5);
    }

    #[test]
    fn bad_token_json_is_usage_error() {
        let err = parse_token("nope").unwrap_err();
        assert!(err.downcast_ref::<UsageError>().is_some());
    }
}
