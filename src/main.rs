mod cli;
mod commands;
mod driver;
mod facts;
mod paths;
mod progress;
mod resource;
mod schema;
mod state;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    let document = cli.document.as_deref();

    match cli.command {
        Commands::Status { limit } => commands::converge::status(&ctx, document, limit.as_deref()),
        Commands::Diff { limit } => commands::converge::diff(&ctx, document, limit.as_deref()),
        Commands::Apply {
            dry_run,
            yes,
            skip_facts,
            limit,
        } => commands::converge::apply(&ctx, document, limit.as_deref(), dry_run, yes, skip_facts),
        Commands::Facts => commands::facts::run(&ctx, document),
        Commands::Validate => commands::validate::run(&ctx, document),
        Commands::Destroy { dry_run } => commands::destroy::run(&ctx, document, dry_run),
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "mongoform", &mut io::stdout());
            Ok(())
        }
    }
}
