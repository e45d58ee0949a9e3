// src/commands/mod.rs

//! Command dispatch. Each group lives in its own module.

pub mod doc;
pub mod job;
pub mod objects;
pub mod seed;
pub mod service;

use crate::cli::{Cli, Command, TestCommand};
use crate::{cicd, version};

use anyhow::Result;
use clap::CommandFactory;

/// Flags shared by every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalOpts {
    pub json: bool,
}

/// Entry point from `main.rs`.
pub async fn run(cli: Cli) -> Result<()> {
    let opts = GlobalOpts { json: cli.json };

    if cli.version {
        return version::show_version_info().await;
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    if !opts.json && !matches!(command, Command::Version) {
        version::check_latest_version().await;
    }

    match command {
        Command::Version => version::show_version_info().await,
        Command::Service(cmd) => service::handle(cmd, opts).await,
        Command::Token(cmd) => service::handle_token(cmd).await,
        Command::Tenant(_) => objects::list_tenants(opts).await,
        Command::Repo(_) => objects::list_repos(opts).await,
        Command::Plan(_) => objects::list_plans(opts).await,
        Command::Org(cmd) => objects::handle_org(cmd, opts).await,
        Command::Scratch(cmd) => objects::handle_scratch(cmd, opts).await,
        Command::Job(cmd) => job::handle(cmd, opts).await,
        Command::Github(cmd) => cicd::handle(cmd),
        Command::Doc(cmd) => doc::handle(cmd, opts),
        Command::Test(TestCommand::SeedData {
            recipe,
            repo,
            output,
        }) => seed::seed_data(&recipe, &repo, &output).await,
    }
}
