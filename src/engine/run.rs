// src/engine/run.rs

use crate::engine::checkout::{Checkout, RepoInfo};
use crate::engine::dependencies::prepare_dependencies;
use crate::engine::events::{job_started, JobEvent, JobEventKind};
use crate::engine::job::Job;
use crate::engine::orgs::{create_scratch_org, import_org, remove_org, worker_alias};
use crate::engine::plan::{build_plan, PlannedStep};
use crate::engine::sink::EventSink;
use crate::engine::summary::job_summary_table;
use crate::output::should_use_color;
use crate::sinks::worker::WorkerEventSink;
use crate::toolchain::Toolchain;
use crate::worker::{JobSigner, WorkerClient};

use anyhow::{bail, Context, Result};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Create the scratch org again even if the request already completed.
    pub retry_scratch: bool,
    /// Stream tool output instead of capturing it.
    pub verbose: bool,
}

/// Everything a job run talks to.
pub struct JobContext<'a> {
    pub worker: &'a WorkerClient,
    pub signer: &'a JobSigner,
    pub tools: &'a dyn Toolchain,
    pub options: RunOptions,
}

/// Orgs added to the local keychains that must be removed afterwards.
#[derive(Debug, Default)]
struct OrgLedger {
    orgs: Vec<(String, String)>,
}

/// Claim a queued job and run it locally.
pub async fn run_job(
    worker: &WorkerClient,
    tools: &dyn Toolchain,
    job_id: &str,
    options: RunOptions,
) -> Result<()> {
    let start = worker
        .job_start(job_id)
        .await
        .with_context(|| format!("Failed to start job {}", job_id))?;
    let signer = JobSigner::from_base64(&start.signing_key)?;

    let ctx = JobContext {
        worker,
        signer: &signer,
        tools,
        options,
    };
    let mut sink = WorkerEventSink::new(worker, &signer, job_id);

    let workdir = tempfile::tempdir().context("Failed to create a working directory")?;
    execute_job(&start.job, &ctx, workdir.path(), &mut sink).await
}

/// Run `job` in `workdir`, reporting progress to `sink`.
///
/// Orgs are always cleaned up before the final status is reported.
pub async fn execute_job(
    job: &Job,
    ctx: &JobContext<'_>,
    workdir: &Path,
    sink: &mut dyn EventSink,
) -> Result<()> {
    let mut ledger = OrgLedger::default();
    let result = run_steps(job, ctx, workdir, sink, &mut ledger).await;

    if !ledger.orgs.is_empty() {
        let checkout = Checkout::new(workdir, &RepoInfo::default());
        for (org_name, alias) in ledger.orgs.iter().rev() {
            remove_org(ctx.tools, &checkout, org_name, alias).await;
        }
    }

    match result {
        Ok(()) => {
            sink.emit(JobEvent::new(&job.id, JobEventKind::JobFinished)).await?;
            eprintln!("Job {} completed", job.id);
            Ok(())
        }
        Err(err) => {
            tracing::error!(job_id = %job.id, "job failed: {:#}", err);
            let failed = JobEvent::new(
                &job.id,
                JobEventKind::JobFailed {
                    exception: format!("{:#}", err),
                },
            );
            if let Err(report_err) = sink.emit(failed).await {
                tracing::warn!(job_id = %job.id, error = %report_err, "failed to report job failure");
            }
            Err(err)
        }
    }
}

async fn run_steps(
    job: &Job,
    ctx: &JobContext<'_>,
    workdir: &Path,
    sink: &mut dyn EventSink,
    ledger: &mut OrgLedger,
) -> Result<()> {
    let commit = job.commit_sha()?;
    let repo = job
        .repo
        .as_ref()
        .with_context(|| format!("Job {} has no repository", job.id))?;

    /* ---------------- checkout ---------------- */

    let archive = ctx
        .worker
        .job_repo_contents(ctx.signer, &job.id, &repo.id, &commit)
        .await?;
    let checkout = Checkout::unpack(
        &archive,
        workdir,
        &RepoInfo {
            commit: commit.clone(),
            branch: job.branch().map(str::to_string),
            url: repo.url.clone(),
        },
    )?;
    tracing::info!(job_id = %job.id, commit = %commit, "checked out repository");

    /* ---------------- org ---------------- */

    let org_name = acquire_org(job, ctx, &checkout, ledger).await?;

    /* ---------------- plan ---------------- */

    let mut cumulusci = checkout.load_cumulusci()?;
    let dependency_steps = prepare_dependencies(&job.id, job.dependencies(), &checkout.root)?;
    let plan = build_plan(job, &mut cumulusci, &dependency_steps, &org_name)?;
    checkout.save_cumulusci(&cumulusci)?;

    let summary: Vec<_> = plan.iter().map(PlannedStep::to_summary).collect();
    println!("{}", job_summary_table(&summary).render(should_use_color()));

    /* ---------------- execute ---------------- */

    sink.emit(job_started(&job.id)).await?;

    for step in &plan {
        let (path, name) = (step.step_num.clone(), step.task_name.clone());
        sink.emit(JobEvent::new(
            &job.id,
            JobEventKind::StepStarted {
                path: path.clone(),
                name: name.clone(),
            },
        ))
        .await?;

        ctx.tools
            .run_checked(&checkout.cci(step.args.clone()), ctx.options.verbose)
            .await
            .with_context(|| format!("Step {} ({}) failed", path, name))?;

        sink.emit(JobEvent::new(&job.id, JobEventKind::StepFinished { path, name }))
            .await?;
    }

    Ok(())
}

/// Make an org available for the job; returns the CumulusCI org name.
async fn acquire_org(
    job: &Job,
    ctx: &JobContext<'_>,
    checkout: &Checkout,
    ledger: &mut OrgLedger,
) -> Result<String> {
    let verbose = ctx.options.verbose;
    let retry = ctx.options.retry_scratch;

    match (&job.scratch_create_request, &job.access_token) {
        (Some(request), token) if token.is_none() || retry => {
            if !(request.is_pending() || retry) {
                bail!(
                    "Scratch create request is already completed with status {}. Use --retry-scratch to retry creating the scratch org.",
                    request.status
                );
            }
            let org_name = request.org_name_for(&job.id);

            let devhub_alias = match &job.devhub_access_token {
                Some(token) => {
                    let devhub_name = format!("job-{}-devhub", job.id);
                    let instance_url = job
                        .devhub_instance_url
                        .as_deref()
                        .context("Job has a DevHub token but no DevHub instance URL")?;
                    ledger.orgs.push((devhub_name.clone(), worker_alias(&devhub_name)));
                    Some(
                        import_org(ctx.tools, checkout, &devhub_name, token, instance_url, verbose)
                            .await?,
                    )
                }
                None => None,
            };

            let scratch_alias = format!("{}__{}", checkout.project_name()?, org_name);
            ledger.orgs.push((org_name.clone(), scratch_alias));

            let completion = create_scratch_org(
                ctx.tools,
                checkout,
                &org_name,
                request,
                devhub_alias.as_deref(),
                verbose,
            )
            .await?;

            ctx.worker
                .scratch_create_request_complete(ctx.signer, &request.id, &completion)
                .await
                .with_context(|| format!("Failed to complete scratch create request {}", request.id))?;
            tracing::info!(org = %org_name, "scratch org created");
            Ok(org_name)
        }
        (_, Some(token)) => {
            let org_name = format!("d2x-job-{}", job.id);
            let instance_url = job
                .instance_url
                .as_deref()
                .context("Job has an org access token but no instance URL")?;
            // Registered first so a half-finished import is still logged out.
            ledger.orgs.push((org_name.clone(), worker_alias(&org_name)));
            import_org(ctx.tools, checkout, &org_name, token, instance_url, verbose).await?;
            Ok(org_name)
        }
        _ => bail!("Job does not have a scratch create request or org user id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::zip_bytes;
    use crate::sinks::collecting::CollectingEventSink;
    use crate::toolchain::fake::FakeToolchain;
    use base64::Engine as _;
    use serde_json::{json, Value};
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn signer() -> JobSigner {
        JobSigner::from_base64(&base64::engine::general_purpose::STANDARD.encode([3u8; 32])).unwrap()
    }

    async fn worker_server() -> MockServer {
        let server = MockServer::start().await;
        let archive = zip_bytes(&[("acme-widgets-abc/cumulusci.yml", "project:\n  name: Widgets\n")]);
        Mock::given(method("POST"))
            .and(path("/d2x/acme/jobs/j1/repo-contents"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/d2x/acme/scratch-create-requests/s1/complete"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "s1"})))
            .mount(&server)
            .await;
        server
    }

    fn job(extra: Value) -> Job {
        let mut base = json!({
            "id": "j1",
            "ref": {"commit": "abc"},
            "repo": {"id": "r1", "name": "widgets"},
            "run": [{"name": "Dev Org", "config": {"type": "cumulusci_flow", "flow": "dev_org"}}]
        });
        for (k, v) in extra.as_object().unwrap() {
            base[k] = v.clone();
        }
        serde_json::from_value(base).unwrap()
    }

    #[tokio::test]
    async fn org_user_job_runs_and_cleans_up() {
        let server = worker_server().await;
        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let signer = signer();
        let fake = FakeToolchain::new();
        let ctx = JobContext {
            worker: &worker,
            signer: &signer,
            tools: &fake,
            options: RunOptions::default(),
        };
        let dir = tempdir().unwrap();
        let mut sink = CollectingEventSink::new();

        let j = job(json!({"access_token": "00D!x", "instance_url": "https://x"}));
        execute_job(&j, &ctx, dir.path(), &mut sink).await.unwrap();

        assert_eq!(
            sink.messages(),
            vec![
                "Job j1 started",
                "Task 1/dev_org started",
                "Task 1/dev_org completed",
                "Job j1 completed"
            ]
        );

        let lines = fake.command_lines();
        assert!(lines.contains(&"cci flow run dev_org --org d2x-job-j1".to_string()));
        assert_eq!(lines[lines.len() - 2], "cci org remove d2x-job-j1");
        assert_eq!(
            lines[lines.len() - 1],
            "sf org logout --target-org D2X-WORKER-d2x-job-j1 --no-prompt"
        );
    }

    #[tokio::test]
    async fn failing_step_reports_failure_and_still_cleans_up() {
        let server = worker_server().await;
        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let signer = signer();
        let fake = FakeToolchain::new();
        fake.fail("cci flow run", "Deploy failed");
        let ctx = JobContext {
            worker: &worker,
            signer: &signer,
            tools: &fake,
            options: RunOptions::default(),
        };
        let dir = tempdir().unwrap();
        let mut sink = CollectingEventSink::new();

        let j = job(json!({"access_token": "00D!x", "instance_url": "https://x"}));
        let err = execute_job(&j, &ctx, dir.path(), &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("Step 1 (dev_org) failed"));

        let last = sink.events().last().unwrap();
        assert!(matches!(&last.kind, JobEventKind::JobFailed { exception } if exception.contains("failed")));
        assert!(fake.command_lines().iter().any(|l| l.starts_with("cci org remove")));
    }

    #[tokio::test]
    async fn half_imported_org_is_still_logged_out() {
        let server = worker_server().await;
        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let signer = signer();
        let fake = FakeToolchain::new();
        fake.fail("cci org import", "Org import failed");
        let ctx = JobContext {
            worker: &worker,
            signer: &signer,
            tools: &fake,
            options: RunOptions::default(),
        };
        let dir = tempdir().unwrap();
        let mut sink = CollectingEventSink::new();

        let j = job(json!({"access_token": "00D!x", "instance_url": "https://x"}));
        let err = execute_job(&j, &ctx, dir.path(), &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("Failed to import org d2x-job-j1 into CumulusCI"));

        let lines = fake.command_lines();
        assert!(lines.iter().any(|l| l.starts_with("sf org login access-token")));
        assert!(lines.contains(&"sf org logout --target-org D2X-WORKER-d2x-job-j1 --no-prompt".to_string()));
    }

    #[tokio::test]
    async fn pending_scratch_request_creates_org() {
        let server = worker_server().await;
        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let signer = signer();
        let fake = FakeToolchain::new();
        fake.respond("cci org info", r#"{"user_id": "005"}"#);
        fake.respond("sf org display", r#"{"result": {"id": "00Dscratch", "username": "u@x"}}"#);
        let ctx = JobContext {
            worker: &worker,
            signer: &signer,
            tools: &fake,
            options: RunOptions::default(),
        };
        let dir = tempdir().unwrap();
        let mut sink = CollectingEventSink::new();

        let j = job(json!({
            "scratch_create_request": {
                "id": "s1", "org_name": "job-{JOB_ID}", "status": "pending",
                "cumulusci_config_name": "dev", "days": 1
            },
            "devhub_access_token": "hub!tok",
            "devhub_instance_url": "https://hub"
        }));
        execute_job(&j, &ctx, dir.path(), &mut sink).await.unwrap();

        let lines = fake.command_lines();
        assert!(lines.contains(&"cci org import D2X-WORKER-job-j1-devhub job-j1-devhub".to_string()));
        assert!(lines.contains(&"cci org scratch dev job-j1 --days 1".to_string()));
        assert!(lines.contains(&"cci flow run dev_org --org job-j1".to_string()));
        assert!(lines.contains(&"sf org logout --target-org Widgets__job-j1 --no-prompt".to_string()));
        assert!(lines.contains(&"sf org logout --target-org D2X-WORKER-job-j1-devhub --no-prompt".to_string()));
    }

    #[tokio::test]
    async fn completed_scratch_request_needs_retry_flag() {
        let server = worker_server().await;
        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let signer = signer();
        let fake = FakeToolchain::new();
        let ctx = JobContext {
            worker: &worker,
            signer: &signer,
            tools: &fake,
            options: RunOptions::default(),
        };
        let dir = tempdir().unwrap();
        let mut sink = CollectingEventSink::new();

        let j = job(json!({
            "scratch_create_request": {"id": "s1", "status": "complete", "cumulusci_config_name": "dev"}
        }));
        let err = execute_job(&j, &ctx, dir.path(), &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("--retry-scratch"));
    }

    #[tokio::test]
    async fn job_without_org_fails() {
        let server = worker_server().await;
        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let signer = signer();
        let fake = FakeToolchain::new();
        let ctx = JobContext {
            worker: &worker,
            signer: &signer,
            tools: &fake,
            options: RunOptions::default(),
        };
        let dir = tempdir().unwrap();
        let mut sink = CollectingEventSink::new();

        let err = execute_job(&job(json!({})), &ctx, dir.path(), &mut sink)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Job does not have a scratch create request or org user id"
        );
        assert_eq!(sink.messages(), vec!["Job j1 failed"]);
    }

    #[tokio::test]
    async fn run_job_reports_signed_statuses() {
        let server = worker_server().await;
        Mock::given(method("POST"))
            .and(path("/d2x/acme/jobs/j1/start"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signing_key": base64::engine::general_purpose::STANDARD.encode([3u8; 32]),
                "job": {
                    "id": "j1",
                    "ref": {"commit": "abc"},
                    "repo": {"id": "r1"},
                    "access_token": "00D!x",
                    "instance_url": "https://x",
                    "run": [{"config": {"type": "cumulusci_task", "task": "deploy"}}]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/d2x/acme/jobs/j1/status"))
            .and(wiremock::matchers::header_exists(crate::worker::SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(4)
            .mount(&server)
            .await;

        let worker = WorkerClient::new(&server.uri(), "tok", "acme").unwrap();
        let fake = FakeToolchain::new();
        run_job(&worker, &fake, "j1", RunOptions::default()).await.unwrap();

        assert!(fake
            .command_lines()
            .contains(&"cci task run deploy --org d2x-job-j1".to_string()));
    }
}
