//! fileledger CLI Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Command-line host for the fileledger import engine.
//!
//! # Overview
//!
//! - **Import**: load new delimited files from a directory (`fileledger run`)
//! - **Acknowledge**: journal known-bad files so they are never offered again
//!   (`fileledger acknowledge`)
//! - **Inspect**: show the most recent batch (`fileledger last-batch`)
//! - **Hash**: print the content hash the journal would record (`fileledger hash`)
//!
//! Settings come from the environment (`DATABASE_URL`, `IMPORT_*`,
//! `IMPORTER_NAME`, `LOG_*`, a `.env` file is honoured); flags override them.

pub mod commands;
pub mod error;
pub mod row;

pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// fileledger - exactly-once loading of flat files
#[derive(Parser, Debug)]
#[command(name = "fileledger")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Importer kind recorded in the journal (overrides IMPORTER_NAME)
    #[arg(long, global = true)]
    pub importer: Option<String>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import every new file under a directory
    Run(RunArgs),

    /// Journal files as handled without importing them
    Acknowledge {
        /// Files to acknowledge
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Why the files are not imported; stored with each event
        #[arg(short, long)]
        reason: String,

        /// Digest algorithm (overrides IMPORT_HASH_ALGORITHM)
        #[arg(long)]
        algorithm: Option<String>,
    },

    /// Show the most recent batch for the importer
    LastBatch,

    /// Print the content hash of files
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Digest algorithm (overrides IMPORT_HASH_ALGORITHM)
        #[arg(long)]
        algorithm: Option<String>,
    },
}

/// Options for `fileledger run`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Directory to import from (overrides IMPORT_ROOT)
    pub root: Option<PathBuf>,

    /// Descend into subdirectories
    #[arg(short = 'R', long)]
    pub recursive: bool,

    /// Destination table, optionally schema qualified
    #[arg(short, long, required_unless_present = "dry_run")]
    pub table: Option<String>,

    /// Destination columns, in file column order
    ///
    /// Values are bound as integers, decimals, booleans or dates only when
    /// written in canonical form (`42`, `1.5`, `true`, `2024-03-15`). Other
    /// text, such as `007`, `+5`, `1.50` or `TRUE`, is bound as text, so rows
    /// carrying it into numeric or boolean columns are rejected by the server.
    /// Load such files into text columns and convert them in SQL.
    #[arg(short, long, value_delimiter = ',', required_unless_present = "dry_run")]
    pub columns: Vec<String>,

    /// Column receiving the import event id; `none` to skip it
    #[arg(long, default_value = "import_id")]
    pub import_id_column: String,

    /// Field delimiter: a single character, or `tab`
    #[arg(short, long, default_value = ",")]
    pub delimiter: String,

    /// Files have no header row
    #[arg(long)]
    pub no_header: bool,

    /// Only import files with these extensions (e.g. csv,tsv)
    #[arg(short, long, value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Retry files whose journal status is unknown
    #[arg(long)]
    pub reprocess_unknowns: bool,

    /// Retry files that failed in earlier runs
    #[arg(long)]
    pub reprocess_failures: bool,

    /// What to do when a file fails: continue or rethrow
    #[arg(long)]
    pub on_error: Option<String>,

    /// Digest algorithm (overrides IMPORT_HASH_ALGORITHM)
    #[arg(long)]
    pub algorithm: Option<String>,

    /// Rows per insert statement
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Files hashed concurrently
    #[arg(long)]
    pub hash_concurrency: Option<usize>,

    /// Take the import moment from a yyyyMMdd[HHmm[ss]]_ file name prefix
    #[arg(long)]
    pub derive_moment_from_name: bool,

    /// Parse and count records against an in-memory journal; nothing is written
    #[arg(long)]
    pub dry_run: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "fileledger",
            "--importer",
            "claims",
            "run",
            "/data/inbox",
            "--table",
            "staging.claims",
            "--columns",
            "claim_id,amount",
            "--extensions",
            "csv,tsv",
            "--reprocess-failures",
        ])
        .unwrap();

        assert_eq!(cli.importer.as_deref(), Some("claims"));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.root, Some(PathBuf::from("/data/inbox")));
        assert_eq!(args.table.as_deref(), Some("staging.claims"));
        assert_eq!(args.columns, vec!["claim_id", "amount"]);
        assert_eq!(args.extensions, vec!["csv", "tsv"]);
        assert!(args.reprocess_failures);
        assert!(!args.reprocess_unknowns);
        assert_eq!(args.import_id_column, "import_id");
    }

    #[test]
    fn test_run_requires_table_unless_dry_run() {
        assert!(Cli::try_parse_from(["fileledger", "run", "/in"]).is_err());
        assert!(Cli::try_parse_from(["fileledger", "run", "/in", "--dry-run"]).is_ok());
    }

    #[test]
    fn test_acknowledge_requires_reason() {
        assert!(Cli::try_parse_from(["fileledger", "acknowledge", "a.csv"]).is_err());

        let cli = Cli::try_parse_from(["fileledger", "acknowledge", "a.csv", "b.csv", "-r", "bad extract"])
            .unwrap();
        match cli.command {
            Commands::Acknowledge { files, reason, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(reason, "bad extract");
            },
            other => panic!("unexpected command {:?}", other),
        }
    }
}
