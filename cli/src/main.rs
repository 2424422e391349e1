// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # fsgate
//!
//! The `fsgate` binary boots the service container and serves the gateway's
//! HTTP boundary.
//!
//! ## Commands
//!
//! - `fsgate serve` - Boot the container and serve until SIGINT/SIGTERM
//! - `fsgate config show` - Print the effective configuration (secrets masked)
//!
//! ## Directories
//!
//! `--home` is required. Config, log and temp directories default to
//! `<home>/conf`, `<home>/log` and `<home>/temp` and must already exist.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fsgate_core::application::container::ContainerDirs;
use std::path::PathBuf;

mod commands;
mod daemon;

use commands::ConfigCommand;

/// Name of the container; prefixes every configuration key.
pub const SERVER_NAME: &str = "fsgate";

/// fsgate - secure HTTP gateway to cluster filesystems
#[derive(Parser)]
#[command(name = "fsgate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Home directory of the server
    #[arg(long, global = true, env = "FSGATE_HOME", value_name = "DIR")]
    home: Option<PathBuf>,

    /// Configuration directory (default: <home>/conf)
    #[arg(long, global = true, env = "FSGATE_CONFIG_DIR", value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Log directory (default: <home>/log)
    #[arg(long, global = true, env = "FSGATE_LOG_DIR", value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Temp directory (default: <home>/temp)
    #[arg(long, global = true, env = "FSGATE_TEMP_DIR", value_name = "DIR")]
    temp_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FSGATE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the service container and serve HTTP
    #[command(name = "serve")]
    Serve {
        /// HTTP host (default: 127.0.0.1)
        #[arg(long, env = "FSGATE_HOST", default_value = "127.0.0.1")]
        host: String,

        /// HTTP port (default: 14000)
        #[arg(long, env = "FSGATE_PORT", default_value = "14000")]
        port: u16,

        /// Serve Prometheus metrics on this port
        #[arg(long, env = "FSGATE_METRICS_PORT")]
        metrics_port: Option<u16>,

        /// Root directory of the local cluster binding (default: <home>/cluster)
        #[arg(long, env = "FSGATE_CLUSTER_ROOT", value_name = "DIR")]
        cluster_root: Option<PathBuf>,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

impl Cli {
    fn dirs(&self) -> Result<ContainerDirs> {
        let home = self
            .home
            .clone()
            .context("No home directory given (use --home or FSGATE_HOME)")?;
        let home = std::path::absolute(&home)
            .with_context(|| format!("Invalid home directory {}", home.display()))?;

        let mut dirs = ContainerDirs::under_home(home);
        if let Some(dir) = &self.config_dir {
            dirs.config = std::path::absolute(dir)?;
        }
        if let Some(dir) = &self.log_dir {
            dirs.log = std::path::absolute(dir)?;
        }
        if let Some(dir) = &self.temp_dir {
            dirs.temp = std::path::absolute(dir)?;
        }
        Ok(dirs)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let dirs = cli.dirs()?;
    match cli.command {
        Commands::Serve {
            host,
            port,
            metrics_port,
            cluster_root,
        } => {
            let cluster_root = cluster_root.unwrap_or_else(|| dirs.home.join("cluster"));
            daemon::start_server(daemon::ServeOptions {
                dirs,
                host,
                port,
                metrics_port,
                cluster_root,
            })
            .await
        }
        Commands::Config { command } => commands::config::handle_command(command, dirs).await,
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
