//! Seedcast CLI - Command-line interface
//!
//! Runs the origin control plane, the peer side of a distribution, or builds
//! a descriptor file from local content.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use seedcast_core::config::DEFAULT_CONFIG_FILE;
use seedcast_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "seedcast")]
#[command(about = "Swarm distribution of one large artifact to a fixed set of peers")]
struct Cli {
    /// Console log level; RUST_LOG takes precedence when set
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// JSONC configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory for the full trace of the current run
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialize logging")?;

    commands::handle_command(cli.command, &cli.config).await
}
