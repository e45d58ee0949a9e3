// src/engine/orgs.rs

//! Getting a Salesforce org into the CumulusCI and Salesforce CLI keychains
//! for the duration of a job, and removing it afterwards.

use crate::engine::checkout::Checkout;
use crate::engine::job::ScratchCreateRequest;
use crate::toolchain::{Invocation, Toolchain};
use crate::worker::ScratchOrgCompletion;

use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Salesforce CLI alias used for orgs imported by the worker.
pub fn worker_alias(org_name: &str) -> String {
    format!("D2X-WORKER-{}", org_name)
}

/// Import an org from an access token; returns its Salesforce CLI alias.
pub async fn import_org(
    tools: &dyn Toolchain,
    checkout: &Checkout,
    org_name: &str,
    access_token: &str,
    instance_url: &str,
    verbose: bool,
) -> Result<String> {
    let alias = worker_alias(org_name);
    tracing::info!(org = org_name, "importing org");

    let login = checkout
        .sf([
            "org",
            "login",
            "access-token",
            "--instance-url",
            instance_url,
            "--alias",
            &alias,
            "--no-prompt",
        ])
        .env("SF_ACCESS_TOKEN", access_token)
        .env("SF_INSTANCE_URL", instance_url);
    tools
        .run_checked(&login, verbose)
        .await
        .with_context(|| format!("Failed to import org {} into the Salesforce CLI", org_name))?;

    tools
        .run_checked(&checkout.cci(["org", "import", &alias, org_name]), verbose)
        .await
        .with_context(|| format!("Failed to import org {} into CumulusCI", org_name))?;

    Ok(alias)
}

/// Define and create a scratch org, returning the details to report back.
pub async fn create_scratch_org(
    tools: &dyn Toolchain,
    checkout: &Checkout,
    org_name: &str,
    request: &ScratchCreateRequest,
    devhub_alias: Option<&str>,
    verbose: bool,
) -> Result<ScratchOrgCompletion> {
    tracing::info!(org = org_name, config = %request.cumulusci_config_name, "creating scratch org");

    let with_devhub = |inv: Invocation| match devhub_alias {
        Some(alias) => inv.env("SF_TARGET_DEV_HUB", alias),
        None => inv,
    };

    let mut define = vec![
        "org".to_string(),
        "scratch".into(),
        request.cumulusci_config_name.clone(),
        org_name.to_string(),
    ];
    if let Some(days) = request.days {
        define.push("--days".into());
        define.push(days.to_string());
    }
    tools
        .run_checked(&with_devhub(checkout.cci(define)), verbose)
        .await
        .with_context(|| format!("Failed to define scratch org {}", org_name))?;

    // `org info` creates the org on first use.
    let info = tools
        .run_checked(
            &with_devhub(checkout.cci(["org", "info", org_name, "--json"])),
            false,
        )
        .await
        .with_context(|| format!("Failed to create scratch org {}", org_name))?;
    let info = parse_json_output(&info.stdout).context("Failed to parse `cci org info` output")?;

    let alias = format!("{}__{}", checkout.project_name()?, org_name);
    let display = tools
        .run_checked(
            &checkout.sf(["org", "display", "--target-org", &alias, "--verbose", "--json"]),
            false,
        )
        .await
        .with_context(|| format!("Failed to read scratch org {} from the Salesforce CLI", org_name))?;
    let display =
        parse_json_output(&display.stdout).context("Failed to parse `sf org display` output")?;

    scratch_completion(&info, &display)
}

/// Combine `cci org info` and `sf org display` output.
pub fn scratch_completion(info: &Value, display: &Value) -> Result<ScratchOrgCompletion> {
    let result = display.get("result").unwrap_or(display);
    let text = |v: &Value, key: &str| v.get(key).and_then(|x| x.as_str()).map(str::to_string);

    let org_id = text(result, "id")
        .or_else(|| {
            text(result, "accessToken").and_then(|t| t.split('!').next().map(str::to_string))
        })
        .or_else(|| text(info, "org_id"));
    let Some(org_id) = org_id else {
        bail!("Scratch org display did not include an org id");
    };

    Ok(ScratchOrgCompletion {
        org_id,
        instance_url: text(result, "instanceUrl")
            .or_else(|| text(info, "instance_url"))
            .unwrap_or_default(),
        username: text(result, "username")
            .or_else(|| text(info, "username"))
            .unwrap_or_default(),
        user_id: text(info, "user_id"),
        sfdx_auth_url: text(result, "sfdxAuthUrl"),
    })
}

/// Forget an org in both keychains. Failures are logged, not returned.
pub async fn remove_org(tools: &dyn Toolchain, checkout: &Checkout, org_name: &str, alias: &str) {
    let steps = [
        checkout.cci(["org", "remove", org_name]),
        checkout.sf(["org", "logout", "--target-org", alias, "--no-prompt"]),
    ];
    for inv in &steps {
        match tools.output(inv).await {
            Ok(out) if out.success => {}
            Ok(out) => tracing::warn!(command = %inv.display(), stderr = %out.stderr.trim(), "org cleanup failed"),
            Err(err) => tracing::warn!(command = %inv.display(), error = %err, "org cleanup failed"),
        }
    }
}

/// Parse JSON from tool output, skipping any banner printed before it.
fn parse_json_output(stdout: &str) -> Result<Value> {
    let start = stdout.find('{').context("no JSON object in output")?;
    Ok(serde_json::from_str(&stdout[start..])?)
}
