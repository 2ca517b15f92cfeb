use std::path::PathBuf;

use crate::build_info;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    about = "Resilient sync engine for legislative records",
    version = build_info::VERSION_WITH_COMMIT,
    long_version = build_info::VERSION_WITH_COMMIT
)]
pub struct Cli {
    #[arg(long, global = true, default_value = "info")]
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run the admin HTTP server (health, stats, cache, sync, metrics)
    Serve,

    /// Sync a JSON array of records into one endpoint's table
    Sync {
        #[arg(short, long)]
        /// Endpoint name, e.g. member_data
        endpoint: String,

        #[arg(short, long)]
        /// Path to a JSON file holding an array of records
        input: PathBuf,

        #[arg(long)]
        /// Override the configured sub-batch size
        batch_size: Option<usize>,

        #[arg(long)]
        /// Keep existing rows instead of merging on conflict
        ignore_duplicates: bool,

        #[arg(long)]
        /// Write into an in-memory store instead of Postgres
        dry_run: bool,
    },

    /// Probe the database and print the health report
    Health,

    /// List known endpoints and their tables
    Endpoints,
}

impl Command {
    /// Run mode reported in the `logging_initialized` event.
    pub fn mode(&self) -> &'static str {
        match self {
            Command::Serve => "serve",
            Command::Sync { .. } => "sync",
            Command::Health => "health",
            Command::Endpoints => "endpoints",
        }
    }
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{Cli, Command};
    use crate::build_info;
    use clap::{error::ErrorKind, Parser};

    #[test]
    fn version_short_circuits_other_flags() {
        let err = Cli::try_parse_from([
            "legislative_sync",
            "--version",
            "--this-flag-does-not-exist",
        ])
        .expect_err("expected clap to stop parsing after --version");

        assert_eq!(err.kind(), ErrorKind::DisplayVersion);
        assert!(
            err.to_string().contains(build_info::VERSION_WITH_COMMIT),
            "version output should include semver+commit hash"
        );
    }

    #[test]
    fn sync_subcommand_parses_overrides() {
        let cli = Cli::try_parse_from([
            "legislative_sync",
            "sync",
            "--endpoint",
            "vote_data",
            "--input",
            "votes.json",
            "--batch-size",
            "10",
            "--ignore-duplicates",
        ])
        .expect("valid sync invocation");

        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.command.mode(), "sync");
        assert_eq!(
            cli.command,
            Command::Sync {
                endpoint: "vote_data".to_string(),
                input: PathBuf::from("votes.json"),
                batch_size: Some(10),
                ignore_duplicates: true,
                dry_run: false,
            }
        );
    }

    #[test]
    fn sync_requires_endpoint_and_input() {
        let err = Cli::try_parse_from(["legislative_sync", "sync", "--endpoint", "vote_data"])
            .expect_err("missing --input");
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}
