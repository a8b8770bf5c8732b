//! Depot - Dependency-aware resource pack cache
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use depot::cli::{Cli, Commands};
use depot::config::ConfigManager;
use depot::error::{DepotError, DepotResult};
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> DepotResult<()> {
    let cli = Cli::parse();

    // The registry's blocking entry points must run off the runtime, so
    // main stays synchronous and owns the runtime explicitly.
    let runtime = Runtime::new().map_err(|e| DepotError::io("starting runtime", e))?;

    let manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = runtime.block_on(manager.load())?;

    // Verbosity: 0 = warn (config may raise it), 1 = info, 2+ = debug
    let filter = match (cli.verbose, config.general.verbose) {
        (0, false) => EnvFilter::new("depot=warn"),
        (0, true) | (1, _) => EnvFilter::new("depot=info"),
        _ => EnvFilter::new("depot=debug"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }

    match cli.command {
        Commands::Load(args) => depot::cli::commands::load(args, &config, &runtime),
        Commands::Manifest(args) => depot::cli::commands::manifest(args, &runtime),
        Commands::Config(args) => depot::cli::commands::config(args, &config, &manager, &runtime),
    }
}
