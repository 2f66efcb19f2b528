// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keyglow")]
#[command(author, version, about = "Signal-driven per-key keyboard lighting daemon")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config directory (default: $XDG_CONFIG_HOME/keyglow)
    #[arg(long, global = true, value_name = "DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the lighting daemon
    #[command(visible_alias = "run")]
    Serve,

    /// List available signals and whether they are enabled
    #[command(visible_aliases = ["sig", "s"])]
    Signals,

    /// List stored profiles
    #[command(visible_aliases = ["prof", "p"])]
    Profiles,

    /// Show loaded mapping tables
    #[command(visible_aliases = ["map", "m"])]
    Mappings,

    /// Show daemon configuration summary
    #[command(visible_alias = "i")]
    Info,
}
