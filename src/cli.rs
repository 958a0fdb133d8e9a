use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mongoform")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative provisioning and teardown for MongoDB hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Desired-state document (default: <config dir>/host.toml)
    #[arg(short, long, global = true, env = "MONGOFORM_DOCUMENT")]
    pub document: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show current state vs desired state
    Status {
        /// Limit to assertions matching "type" or "type.name"
        #[arg(short, long)]
        limit: Option<String>,
    },

    /// Preview what apply would change
    Diff {
        /// Limit to assertions matching "type" or "type.name"
        #[arg(short, long)]
        limit: Option<String>,
    },

    /// Converge the host to the desired state
    Apply {
        /// Detect only, change nothing
        #[arg(long)]
        dry_run: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Skip fact gathering (document facts only)
        #[arg(long)]
        skip_facts: bool,

        /// Limit to assertions matching "type" or "type.name"
        #[arg(short, long)]
        limit: Option<String>,
    },

    /// Print gathered host facts
    Facts,

    /// Validate the desired-state document
    Validate,

    /// Destroy the configured test instances
    Destroy {
        /// Report what would be destroyed, change nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
