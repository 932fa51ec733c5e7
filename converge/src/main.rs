//! converge - wait for cluster state from the shell.
//!
//! Runs a command on a schedule and checks its output against a condition
//! until the condition holds, a fatal state is seen, or time runs out.

#![forbid(unsafe_code)]

mod wait;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use converge_common::EngineConfig;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "converge")]
#[command(author, version, about = "Poll a command until its output reaches an expected state")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-run a command until its output satisfies a condition
    Wait(wait::WaitArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    // RUST_LOG wins over both --verbose and CONVERGE_LOG_LEVEL
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(&config.log_level.value)
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    debug!(
        log_level = %config.log_level.value,
        source = %config.log_level.describe_source(),
        "Configuration loaded"
    );

    match cli.command {
        Commands::Wait(args) => wait::run(args, config).await,
    }
}
