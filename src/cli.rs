use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative configuration management", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply the declared state to the node
    Apply(ApplyArgs),

    /// Compare declared and observed state without fixing anything
    Verify(VerifyArgs),

    /// Print one item's declared state as JSON
    Show(ShowArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Node configuration file (TOML)
    pub config: PathBuf,

    /// Show what would be fixed without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Number of parallel workers
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,

    /// Confirm each fix before applying it
    #[arg(short, long)]
    pub interactive: bool,

    /// Only apply matching items (kind or kind:name) and their dependencies
    #[arg(short, long)]
    pub target: Option<String>,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Node configuration file (TOML)
    pub config: PathBuf,

    /// Number of parallel workers
    #[arg(short, long, default_value_t = 4)]
    pub jobs: usize,

    /// Emit machine-readable JSON instead of the human report
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Node configuration file (TOML)
    pub config: PathBuf,

    /// Item id, e.g. file:/etc/motd
    pub item: String,
}
