//! burnsync CLI
//!
//! Pushes local scripts to a remote script host over WebSocket as they
//! change.
//!
//! # Commands
//!
//! - `watch` - Watch the project and keep the remote host in sync (default)
//! - `download` - Wait for the remote host and pull every file once

mod commands;
mod config;
mod control;
mod error;
mod pipeline;
mod resolver;

use clap::{Parser, Subcommand};
use config::{FileConfig, Overrides, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sync local scripts to a remote script host.
#[derive(Parser)]
#[command(name = "burnsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file [default: <cwd>/burnsync.json]
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(global = true, short, long, env = "BURNSYNC_PORT")]
    port: Option<u16>,

    /// Acknowledgment timeout in milliseconds
    #[arg(global = true, short, long)]
    timeout: Option<u64>,

    /// Project root
    #[arg(global = true, long)]
    cwd: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the project and push changes (default)
    Watch,

    /// Wait for the remote host and download every file once
    Download {
        /// Server to download from (repeatable); overrides the config file
        #[arg(short, long)]
        server: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let base = match &cli.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir()?,
    };
    let (config_path, required) = match &cli.config {
        Some(path) => (base.join(path), true),
        None => (base.join(DEFAULT_CONFIG_FILE), false),
    };
    let config_dir = config_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| base.clone());

    let overrides = Overrides {
        port: cli.port,
        timeout: cli.timeout,
        cwd: cli.cwd,
    };
    let settings = FileConfig::load(&config_path, required)?.into_settings(&config_dir, &overrides)?;

    match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => commands::watch::run(settings).await?,
        Commands::Download { server } => commands::download::run(settings, server).await?,
    }
    Ok(())
}
