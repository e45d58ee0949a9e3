// src/commands/job.rs

//! `d2x job create | run | log | steps | list`.

use crate::api::{get_d2x_api_client, ApiError, ApiObject, D2xApiClient, Parents};
use crate::cli::{JobCommand, JobCreateArgs};
use crate::commands::GlobalOpts;
use crate::engine::summary::job_summary_table;
use crate::engine::{run_job, RunOptions};
use crate::error::UsageError;
use crate::output::{print_list, print_object, should_use_color};
use crate::project::ProjectConfig;
use crate::stream::stream_job_log;
use crate::toolchain::SystemToolchain;
use crate::worker::WorkerClient;

use anyhow::{Context, Result};
use serde_json::{json, Value};

pub async fn handle(command: JobCommand, opts: GlobalOpts) -> Result<()> {
    match command {
        JobCommand::Create(args) => {
            validate_create_args(&args)?;
            let project = current_project()?;
            let client = get_d2x_api_client().await?;
            let job_id = create_job(&client, &project, &args).await?;
            println!("Job {} created", job_id);

            if args.local {
                run_locally(&job_id, RunOptions::default()).await?;
            }
            Ok(())
        }
        JobCommand::Run {
            job_id,
            retry_scratch,
            verbose,
        } => {
            run_locally(
                &job_id,
                RunOptions {
                    retry_scratch,
                    verbose,
                },
            )
            .await
        }
        JobCommand::Log { job_id } => log(&job_id).await,
        JobCommand::Steps { job_id } => steps(&job_id, opts).await,
        JobCommand::List { status } => list(status.as_deref(), opts).await,
    }
}

fn current_project() -> Result<ProjectConfig> {
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    ProjectConfig::discover(&cwd)
}

async fn run_locally(job_id: &str, options: RunOptions) -> Result<()> {
    let worker = WorkerClient::from_keychain().await?;
    run_job(&worker, &SystemToolchain, job_id, options).await
}

/* ---------------- create ---------------- */

pub fn validate_create_args(args: &JobCreateArgs) -> Result<(), UsageError> {
    let has_steps = args.flow.is_some() || args.task.is_some();

    if args.plan.is_none() && !has_steps {
        return Err(UsageError::new(
            "You must specify either a plan, flow, or task to create a job",
        ));
    }
    if args.plan.is_some() && has_steps {
        return Err(UsageError::new(
            "You cannot specify both a plan, flow, or task to create a job",
        ));
    }
    if args.org_user.is_none() && args.scratch_org.is_none() {
        return Err(UsageError::new(
            "You must specify either an org user or a scratch org to create a job",
        ));
    }
    if args.org_user.is_some() && args.scratch_org.is_some() {
        return Err(UsageError::new(
            "You cannot specify both org_user and a scratch org to create a job",
        ));
    }
    if args.local && args.remote {
        return Err(UsageError::new(
            "You cannot specify both local and remote to create a job",
        ));
    }
    Ok(())
}

/// One-step run list for a flow or a single task.
pub fn steps_for(args: &JobCreateArgs) -> Option<Value> {
    if let Some(task) = &args.task {
        return Some(json!([{
            "key": "1",
            "name": task,
            "config": {"type": "cumulusci_task", "task": task, "options": {}},
        }]));
    }
    args.flow.as_ref().map(|flow| {
        json!([{
            "key": "1",
            "name": flow,
            "config": {"type": "cumulusci_flow", "flow": flow},
        }])
    })
}

/// Create the job in D2X Cloud and return its id.
pub async fn create_job(
    client: &D2xApiClient,
    project: &ProjectConfig,
    args: &JobCreateArgs,
) -> Result<String> {
    tracing::debug!(root = %project.root.display(), "creating job for project");
    let owner = project.repo_owner()?;
    let name = project.repo_name()?;
    let commit = project.repo_commit()?;

    let repos = client.list(ApiObject::GithubRepo, None, &[]).await?;
    let repo_id = repos
        .iter()
        .find(|r| {
            r.pointer("/org/name").and_then(|v| v.as_str()) == Some(owner)
                && r.get("name").and_then(|v| v.as_str()) == Some(name)
        })
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            UsageError::new(format!(
                "GitHub repo '{}/{}' not found in D2X Cloud. Please make sure you have installed the D2X Cloud GitHub Application to the repo.",
                owner, name
            ))
        })?;

    if let Some(org_user) = &args.org_user {
        if client.read(ApiObject::OrgUser, org_user, None, None).await.is_err() {
            return Err(UsageError::new(format!("Org user '{}' not found in D2X Cloud", org_user)).into());
        }
    }

    let scratch_request = match &args.scratch_org {
        Some(config_name) => {
            if project.scratch_config(config_name).is_none() {
                return Err(UsageError::new(format!(
                    "Scratch org '{}' not found in CumulusCI project config",
                    config_name
                ))
                .into());
            }
            Some(json!({
                "org_name": "job-{JOB_ID}",
                "cumulusci_config_name": config_name,
            }))
        }
        None => None,
    };

    let plan_version_id = match &args.plan {
        Some(slug) => Some(resolve_plan_version(client, slug, args.plan_version.as_deref()).await?),
        None => None,
    };

    let scratch_create_request_id = match scratch_request {
        Some(data) => {
            let created = client
                .create(ApiObject::ScratchCreateRequest, &data, None, None)
                .await
                .context("Failed to create the scratch create request")?;
            created.get("id").and_then(|v| v.as_str()).map(str::to_string)
        }
        None => None,
    };

    let steps = steps_for(args).unwrap_or(Value::Null);
    let job_data = json!({
        "plan_version_id": plan_version_id,
        "org_user_id": args.org_user,
        "ref": {"commit": commit},
        "repo_id": repo_id,
        "steps": serde_json::to_string(&steps)?,
        "scratch_create_request_id": scratch_create_request_id,
    });

    let job = client
        .create(ApiObject::Job, &job_data, None, None)
        .await
        .context("Failed to create the job")?;
    job.get("id")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .context("D2X Cloud did not return a job id")
}

async fn resolve_plan_version(
    client: &D2xApiClient,
    slug: &str,
    version: Option<&str>,
) -> Result<String> {
    let plans = client.list(ApiObject::Plan, None, &[]).await?;
    let plan_id = plans
        .iter()
        .find(|p| p.get("slug").and_then(|v| v.as_str()) == Some(slug))
        .and_then(|p| p.get("id"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| UsageError::new(format!("Plan '{}' not found in D2X Cloud", slug)))?;

    let mut parents = Parents::new();
    parents.insert("plan_id".to_string(), plan_id.to_string());

    let found = match version {
        Some(id) => client
            .read(ApiObject::PlanVersion, id, Some(&parents), None)
            .await
            .ok(),
        None => client
            .list(ApiObject::PlanVersion, Some(&parents), &[])
            .await?
            .into_iter()
            .next(),
    };

    found
        .as_ref()
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            UsageError::new(format!(
                "Plan version '{}' not found in D2X Cloud",
                version.unwrap_or("latest")
            ))
            .into()
        })
}

/* ---------------- log / steps / list ---------------- */

async fn read_job(client: &D2xApiClient, job_id: &str) -> Result<Value> {
    match client.read(ApiObject::Job, job_id, None, None).await {
        Ok(job) if !job.is_null() => Ok(job),
        Ok(_) => Err(UsageError::new(format!("Job {} not found in D2X Cloud", job_id)).into()),
        Err(err) if matches!(err.downcast_ref::<ApiError>(), Some(ApiError::NotFound(_))) => {
            Err(UsageError::new(format!("Job {} not found in D2X Cloud", job_id)).into())
        }
        Err(err) => Err(err),
    }
}

async fn log(job_id: &str) -> Result<()> {
    let client = get_d2x_api_client().await?;
    read_job(&client, job_id).await?;

    let url = client.job_log_ws_url(job_id);
    stream_job_log(&url, client.token(), |message| println!("{}", message)).await?;
    Ok(())
}

/// Decode a job's `steps` field (a JSON-encoded list).
pub fn job_steps(job: &Value) -> Result<Vec<Value>> {
    match job.get("steps") {
        Some(Value::String(raw)) => {
            let parsed: Value = serde_json::from_str(raw).context("Job steps are not valid JSON")?;
            Ok(match parsed {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            })
        }
        Some(Value::Array(items)) => Ok(items.clone()),
        _ => Ok(Vec::new()),
    }
}

async fn steps(job_id: &str, opts: GlobalOpts) -> Result<()> {
    let client = get_d2x_api_client().await?;
    let job = read_job(&client, job_id).await?;
    let steps = job_steps(&job)?;

    if opts.json {
        return print_object(&Value::Array(steps));
    }
    println!("{}", job_summary_table(&steps).render(should_use_color()));
    Ok(())
}

/// Query parameters for `job list`.
pub fn list_query(status: Option<&str>, repo_name: &str) -> Vec<(&'static str, String)> {
    let mut query: Vec<(&'static str, String)> = status
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| ("status__in", s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    query.push(("repo__name", repo_name.to_string()));
    query
}

/// Reduce a job to the listed columns.
pub fn job_row(job: &Value) -> Value {
    let text = |ptr: &str| job.pointer(ptr).and_then(|v| v.as_str()).unwrap_or_default().to_string();
    json!({
        "id": text("/id"),
        "status": text("/status"),
        "repo": format!("{}/{}", text("/repo/org/name"), text("/repo/name")),
    })
}

async fn list(status: Option<&str>, opts: GlobalOpts) -> Result<()> {
    let project = current_project()?;
    let client = get_d2x_api_client().await?;

    let jobs = client
        .list(ApiObject::Job, None, &list_query(status, project.repo_name()?))
        .await?;
    let rows: Vec<Value> = jobs.iter().map(job_row).collect();
    print_list(&rows, opts.json)
}
