// src/main.rs

//! d2x
//!
//! Entry point for the D2X Cloud CLI. Parses arguments, sets up logging and
//! hands off to `commands::run`. Errors are mapped to exit codes here.

mod api;
mod archive;
mod auth;
mod cicd;
mod cli;
mod commands;
mod config;
mod engine;
mod error;
mod output;
mod project;
mod sinks;
mod stream;
mod toolchain;
mod util;
mod version;
mod worker;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let debug = cli.debug;
    init_tracing(debug);

    if let Err(err) = commands::run(cli).await {
        report(&err, debug);
        std::process::exit(error::exit_code_for(&err));
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "d2x=debug" } else { "d2x=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn report(err: &anyhow::Error, debug: bool) {
    let use_color = output::stderr_use_color();

    let message = if err.chain().any(error::is_connection_error) {
        format!("Error: Could not connect to the D2X Cloud API. {}", err)
    } else {
        format!("Error: {}", err)
    };
    eprintln!("{}", output::paint(&message, "31", use_color));

    if debug {
        eprintln!("{:?}", err);
    }
}
