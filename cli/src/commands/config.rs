// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use fsgate_core::application::container::ContainerDirs;
use fsgate_core::infrastructure::config_loader;

use crate::SERVER_NAME;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration, secrets masked
    Show {
        /// Only keys starting with this prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Show where configuration is read from
        #[arg(long)]
        paths: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, dirs: ContainerDirs) -> Result<()> {
    match command {
        ConfigCommand::Show { prefix, paths } => show(&dirs, prefix.as_deref(), paths),
    }
}

fn show(dirs: &ContainerDirs, prefix: Option<&str>, show_paths: bool) -> Result<()> {
    let site = config_loader::site_file(SERVER_NAME, &dirs.config);
    if show_paths {
        println!("{}", "Configuration layers (lowest first):".bold());
        println!("  1. built-in defaults");
        println!(
            "  2. {} {}",
            site.display(),
            if site.is_file() { "" } else { "(not present)" }.dimmed()
        );
        println!(
            "  3. environment ({}_* or exact dotted keys)",
            SERVER_NAME.to_ascii_uppercase()
        );
        println!();
    }

    let defaults = config_loader::embedded_defaults().context("Failed to parse built-in defaults")?;
    let environment: Vec<(String, String)> = std::env::vars().collect();
    let config = config_loader::load(SERVER_NAME, &dirs.config, &defaults, None, &environment)
        .context("Failed to load configuration")?;

    println!("{}", "Effective configuration:".bold());
    for (key, value) in config.masked() {
        if prefix.is_some_and(|p| !key.starts_with(p)) {
            continue;
        }
        println!("  {} = {}", key.cyan(), value);
    }
    Ok(())
}
