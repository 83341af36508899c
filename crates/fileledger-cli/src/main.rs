//! fileledger CLI - Main entry point

use anyhow::Result;
use clap::Parser;
use fileledger_cli::{commands, Cli, Commands};
use fileledger_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .output(LogOutput::Console)
        .log_file_prefix("fileledger")
        .build();

    // Environment variables take precedence over flags
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let guard = init_logging(&log_config)?;

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        // flush file logs before exiting
        drop(guard);
        process::exit(1);
    }

    Ok(())
}

async fn execute_command(cli: &Cli) -> fileledger_cli::Result<()> {
    let importer = cli.importer.as_deref();

    match &cli.command {
        Commands::Run(args) => commands::run::run(args, importer).await.map(|_| ()),

        Commands::Acknowledge {
            files,
            reason,
            algorithm,
        } => commands::acknowledge::run(files, reason, algorithm.as_deref(), importer).await,

        Commands::LastBatch => commands::last_batch::run(importer).await,

        Commands::Hash { files, algorithm } => {
            commands::hash::run(files, algorithm.as_deref()).await.map(|_| ())
        },
    }
}
