//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::loader::Priority;

/// Depot - Dependency-aware resource pack cache
///
/// Loads pack images and the items inside them, following the
/// dependency graph declared in the pack manifest.
#[derive(Parser, Debug)]
#[command(name = "depot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DEPOT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load a pack, or one item out of it
    Load(LoadArgs),

    /// Parse and validate a pack manifest
    Manifest(ManifestArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the load command
#[derive(Parser, Debug)]
pub struct LoadArgs {
    /// Pack id to load
    pub pack: String,

    /// Load this item out of the pack and print its size
    #[arg(short, long)]
    pub item: Option<String>,

    /// Write the item payload to this file
    #[arg(short, long, requires = "item")]
    pub out: Option<PathBuf>,

    /// Manifest file (defaults to manifest.json under the source root)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Block on the load instead of driving the pump loop
    #[arg(long)]
    pub sync: bool,

    /// Load priority
    #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
    pub priority: PriorityArg,
}

/// Arguments for the manifest command
#[derive(Parser, Debug)]
pub struct ManifestArgs {
    /// Manifest file to inspect
    pub path: PathBuf,

    /// Print the dependency closure of this pack only
    #[arg(short, long)]
    pub pack: Option<String>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config action (defaults to show)
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommand actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Display current configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Load priority on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityArg {
    High,
    Normal,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::High => Priority::High,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::Low => Priority::Low,
        }
    }
}
