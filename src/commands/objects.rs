// src/commands/objects.rs

//! Read-only resource commands: tenants, repos, plans, orgs, scratch requests.

use crate::api::{get_d2x_api_client, ApiError, ApiObject};
use crate::cli::{OrgCommand, OrgUserCommand, ScratchCommand};
use crate::commands::GlobalOpts;
use crate::error::UsageError;
use crate::output::{api_list_to_table, print_list, print_object, should_use_color};

use anyhow::Result;
use serde_json::json;

async fn list(obj: ApiObject, opts: GlobalOpts) -> Result<()> {
    let client = get_d2x_api_client().await?;
    let items = client.list(obj, None, &[]).await?;
    print_list(&items, opts.json)
}

pub async fn list_tenants(opts: GlobalOpts) -> Result<()> {
    list(ApiObject::Tenant, opts).await
}

pub async fn list_repos(opts: GlobalOpts) -> Result<()> {
    list(ApiObject::GithubRepo, opts).await
}

pub async fn list_plans(opts: GlobalOpts) -> Result<()> {
    list(ApiObject::Plan, opts).await
}

pub async fn handle_org(command: OrgCommand, opts: GlobalOpts) -> Result<()> {
    match command {
        OrgCommand::List => list(ApiObject::Org, opts).await,
        OrgCommand::User(OrgUserCommand::List) => list(ApiObject::OrgUser, opts).await,
        OrgCommand::User(OrgUserCommand::Browser { org_user, path }) => {
            org_browser(&org_user, path.as_deref()).await
        }
    }
}

async fn org_browser(org_user: &str, path: Option<&str>) -> Result<()> {
    let client = get_d2x_api_client().await?;
    let login_url = match client.org_login(org_user, path).await {
        Ok(Some(url)) => url,
        Ok(None) => return Err(UsageError::new(format!("Org user {} not found", org_user)).into()),
        Err(err) if matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_))) => {
            return Err(UsageError::new(format!("Org user {} not found", org_user)).into())
        }
        Err(err) => return Err(err),
    };

    tracing::debug!(org_user, "opening login url");
    if let Err(err) = open::that(&login_url) {
        tracing::warn!(error = %err, "could not open a browser");
        println!("Open this URL to log in: {}", login_url);
    }
    Ok(())
}

pub async fn handle_scratch(command: ScratchCommand, opts: GlobalOpts) -> Result<()> {
    let client = get_d2x_api_client().await?;
    match command {
        ScratchCommand::List { include_delete } => {
            let creates = client.list(ApiObject::ScratchCreateRequest, None, &[]).await?;
            let deletes = if include_delete {
                Some(client.list(ApiObject::ScratchDeleteRequest, None, &[]).await?)
            } else {
                None
            };

            if opts.json {
                return match deletes {
                    Some(deletes) => print_object(&json!({"create": creates, "delete": deletes})),
                    None => print_list(&creates, true),
                };
            }

            let use_color = should_use_color();
            if let Some(table) = api_list_to_table(&creates) {
                println!("{}", table.with_title("Scratch Create Requests").render(use_color));
            }
            if let Some(table) = deletes.as_deref().and_then(api_list_to_table) {
                println!("{}", table.with_title("Scratch Delete Requests").render(use_color));
            }
            Ok(())
        }
        ScratchCommand::Info { id } => {
            let request = client
                .read(ApiObject::ScratchCreateRequest, &id, None, None)
                .await?;
            print_object(&request)
        }
    }
}
