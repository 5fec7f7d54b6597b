// Copyright (c) 2026 Gridplane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Gridplane CLI
//!
//! The `gridplane` binary runs the cluster control plane and offers
//! inspection commands against its embedded store.
//!
//! ## Commands
//!
//! - `gridplane run` - Run the control plane in the foreground
//! - `gridplane status` - Show aggregated cluster status
//! - `gridplane agents` - List live agent placements
//! - `gridplane config show|validate|generate` - Configuration management
//!
//! Inspection commands open the embedded store directly and therefore
//! require the control plane to be stopped; sled holds an exclusive lock.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{cluster, config, run, ConfigCommand};

/// Gridplane - cluster control plane for distributed AI agents
#[derive(Parser)]
#[command(name = "gridplane")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "GRIDPLANE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "GRIDPLANE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane in the foreground
    #[command(name = "run")]
    Run,

    /// Show aggregated cluster status
    #[command(name = "status")]
    Status,

    /// List live agent placements
    #[command(name = "agents")]
    Agents,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Commands::Run) => run::execute(cli.config).await,
        Some(Commands::Status) => cluster::status(cli.config).await,
        Some(Commands::Agents) => cluster::agents(cli.config).await,
        Some(Commands::Config { command }) => config::handle_command(command, cli.config).await,
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
