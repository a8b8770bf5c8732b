//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::DepotResult;
use console::style;
use tokio::runtime::Runtime;

/// Execute the config command
pub fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
    runtime: &Runtime,
) -> DepotResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config),
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force, runtime)?,
    }
    Ok(())
}

fn show_config(config: &Config) {
    let toml =
        toml::to_string_pretty(config).unwrap_or_else(|_| "Error serializing config".to_string());
    println!("{}", toml);
}

fn init_config(manager: &ConfigManager, force: bool, runtime: &Runtime) -> DepotResult<()> {
    let path = manager.path();
    if path.exists() && !force {
        println!(
            "{} config already exists at {} (use --force to overwrite)",
            style("Skipped:").yellow(),
            path.display()
        );
        return Ok(());
    }

    runtime.block_on(manager.save(&Config::default()))?;
    println!(
        "{} configuration written to {}",
        style("Done:").green().bold(),
        path.display()
    );
    Ok(())
}
