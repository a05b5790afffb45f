//! SecSync CLI
//!
//! Command-line tools for exercising the security state updater against
//! scenario files.
//!
//! # Commands
//!
//! - `diff` - Show the remote calls an update would make
//! - `sync` - Run the updater over a scenario and report the outcome
//! - `version` - Show version information

mod commands;
mod error;
mod scenario;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SecSync command-line tools.
#[derive(Parser)]
#[command(name = "secsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the remote calls an update would make
    Diff {
        /// Path to the scenario file
        scenario: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run the updater over a scenario
    Sync {
        /// Path to the scenario file
        scenario: PathBuf,

        /// Maximum passes per update cycle
        #[arg(long)]
        max_passes: Option<u32>,

        /// Restart cycles until storage settles, without a pass limit
        #[arg(long, conflicts_with = "max_passes")]
        unbounded: bool,

        /// Seconds to wait for queued updates
        #[arg(short, long, default_value = "30")]
        timeout: u64,

        /// Write the resulting scenario to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Diff { scenario, format } => {
            commands::diff::run(&scenario, &format)?;
        }
        Commands::Sync {
            scenario,
            max_passes,
            unbounded,
            timeout,
            output,
            format,
        } => {
            let config = commands::sync::config(max_passes, unbounded, timeout);
            commands::sync::run(&scenario, config, output.as_deref(), &format)?;
        }
        Commands::Version => {
            println!("SecSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SecSync Engine v{}", secsync_engine::VERSION);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_flags_parse() {
        let cli = Cli::parse_from(["secsync", "-v", "sync", "s.json", "--max-passes", "4", "-o", "out.json"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Sync {
                max_passes,
                unbounded,
                output,
                ..
            } => {
                assert_eq!(max_passes, Some(4));
                assert!(!unbounded);
                assert_eq!(output, Some(PathBuf::from("out.json")));
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn pass_limit_conflicts_with_unbounded() {
        let parsed = Cli::try_parse_from(["secsync", "sync", "s.json", "--max-passes", "4", "--unbounded"]);
        assert!(parsed.is_err());
    }
}
