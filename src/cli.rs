// src/cli.rs

use crate::config::ServiceKind;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command-line client for D2X Cloud.
///
/// Authenticates against D2X Cloud, creates and runs automation jobs
/// against Salesforce orgs, and streams their logs.
#[derive(Parser, Debug)]
#[command(name = "d2x", disable_help_subcommand = true, disable_version_flag = true)]
pub struct Cli {
    /// Verbose logging and full error chains
    #[arg(long, global = true)]
    pub debug: bool,

    /// Print raw JSON instead of tables (also skips the version check)
    #[arg(long, global = true)]
    pub json: bool,

    /// Show the version and exit
    #[arg(long = "version")]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the current version of D2X CLI
    Version,

    /// Manage D2X Cloud service credentials
    #[command(subcommand)]
    Service(ServiceCommand),

    /// Inspect OAuth tokens
    #[command(subcommand)]
    Token(TokenCommand),

    /// D2X Cloud tenants
    #[command(subcommand)]
    Tenant(ListCommand),

    /// GitHub repositories connected to D2X Cloud
    #[command(subcommand)]
    Repo(ListCommand),

    /// Plans
    #[command(subcommand)]
    Plan(ListCommand),

    /// Salesforce orgs and their users
    #[command(subcommand)]
    Org(OrgCommand),

    /// Scratch org requests
    #[command(subcommand)]
    Scratch(ScratchCommand),

    /// Create, run and monitor jobs
    #[command(subcommand)]
    Job(JobCommand),

    /// GitHub integration
    #[command(subcommand)]
    Github(GithubCommand),

    /// Project documentation
    #[command(subcommand)]
    Doc(DocCommand),

    /// Test data utilities
    #[command(subcommand)]
    Test(TestCommand),
}

/* ---------------- service / token ---------------- */

#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// Connect a service, running the browser login unless --token is given
    Connect {
        #[arg(value_enum)]
        service: ServiceKind,

        /// Base URL of the D2X Cloud API
        #[arg(long, default_value = "https://d2xapi.onrender.com")]
        base_url: String,

        /// Tenant slug
        #[arg(long)]
        tenant: String,

        /// OAuth token as JSON (skips the device flow)
        #[arg(long)]
        token: Option<String>,
    },

    /// Show a configured service
    Info {
        #[arg(value_enum)]
        service: ServiceKind,
    },

    /// Remove a service from the keychain
    Remove {
        #[arg(value_enum)]
        service: ServiceKind,
    },
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    /// Validate (refreshing if needed) and print the access token
    AccessToken {
        /// Use the d2x_worker service instead of d2x
        #[arg(long)]
        worker: bool,
    },
}

/* ---------------- resources ---------------- */

#[derive(Subcommand, Debug)]
pub enum ListCommand {
    /// List all records
    List,
}

#[derive(Subcommand, Debug)]
pub enum OrgCommand {
    /// List orgs
    List,

    /// Org users
    #[command(subcommand)]
    User(OrgUserCommand),
}

#[derive(Subcommand, Debug)]
pub enum OrgUserCommand {
    /// List org users
    List,

    /// Open an org user's session in the browser
    Browser {
        org_user: String,

        /// Path to open after login, e.g. /lightning/setup/SetupOneHome/home
        #[arg(short, long)]
        path: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScratchCommand {
    /// List scratch create requests
    List {
        /// Include scratch delete requests
        #[arg(long)]
        include_delete: bool,
    },

    /// Show a scratch create request
    Info { id: String },
}

/* ---------------- jobs ---------------- */

#[derive(Subcommand, Debug)]
pub enum JobCommand {
    /// Create a job for the current repository and commit
    Create(JobCreateArgs),

    /// Run a queued job locally
    Run {
        job_id: String,

        /// Retry the scratch org creation if it previously failed
        #[arg(long)]
        retry_scratch: bool,

        /// Show all output from CumulusCI and the Salesforce CLI
        #[arg(long)]
        verbose: bool,
    },

    /// Stream logs from a job
    Log { job_id: String },

    /// List the steps in a job
    Steps { job_id: String },

    /// List jobs for the current repository
    List {
        /// Comma separated statuses: queued, in_progress, failed, success, cancelled
        #[arg(long)]
        status: Option<String>,
    },
}

#[derive(Args, Debug, Default, Clone)]
pub struct JobCreateArgs {
    /// Plan slug
    #[arg(short, long)]
    pub plan: Option<String>,

    /// Plan version id (defaults to the plan's first version)
    #[arg(short = 'n', long)]
    pub plan_version: Option<String>,

    /// CumulusCI flow to run
    #[arg(short, long)]
    pub flow: Option<String>,

    /// CumulusCI task to run
    #[arg(short, long)]
    pub task: Option<String>,

    /// Org user id to run against
    #[arg(short = 'u', long)]
    pub org_user: Option<String>,

    /// Scratch org config name from cumulusci.yml
    #[arg(short, long)]
    pub scratch_org: Option<String>,

    /// Run the job locally right after creating it
    #[arg(short, long)]
    pub local: bool,

    /// Leave the job for a remote worker
    #[arg(short, long)]
    pub remote: bool,
}

/* ---------------- github / doc / test ---------------- */

#[derive(Subcommand, Debug)]
pub enum GithubCommand {
    /// Write the D2X job workflow to .github/workflows/d2x-job.yml
    Init {
        /// Container image the workflow runs in
        #[arg(long)]
        image: Option<String>,

        /// Overwrite an existing workflow
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DocCommand {
    /// Document the project's tasks
    Tasks {
        /// Only include these groups (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TestCommand {
    /// Generate records with Snowfakery and create them in D2X Cloud
    SeedData {
        /// Snowfakery recipe
        #[arg(long)]
        recipe: PathBuf,

        /// GitHub repo id substituted for GITHUB_REPO_ID
        #[arg(long)]
        repo: String,

        /// Where Snowfakery writes its JSON output
        #[arg(long, default_value = "output.json")]
        output: PathBuf,
    },
}
