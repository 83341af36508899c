//! Build automation tasks for fileledger
//!
//! - Generating the CLI reference from the `clap` definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for fileledger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<fileledger_cli::Cli>();

    let content = format!(
        r#"# fileledger CLI Reference

Generated from the CLI source code on {}.

## Overview

`fileledger` loads flat files into a PostgreSQL table exactly once. Each file
is identified by a digest of its content and every attempt is recorded in an
import journal, so reruns skip what is already loaded and failed files roll
back completely.

## Configuration

| Variable | Default | Purpose |
|---|---|---|
| `DATABASE_URL` | `postgresql://localhost/fileledger` | journal and destination database |
| `IMPORTER_NAME` | `default` | importer kind recorded with every event |
| `IMPORT_ROOT` | `.` | directory to import from |
| `IMPORT_HASH_ALGORITHM` | `sha384` | content digest |
| `IMPORT_ON_ERROR` | `continue` | `continue` or `rethrow` when a file fails |
| `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR` | `info`, console, text, `logs` | logging |

A `.env` file in the working directory is read on start.

## Quick Start

```bash
# Load new claim files into staging.claims
fileledger --importer claims run /data/claims \
  --table staging.claims --columns claim_id,member_id,amount --extensions csv

# Preview what a run would pick up
fileledger --importer claims run /data/claims --dry-run

# Retry files that failed after fixing them upstream
fileledger --importer claims run /data/claims \
  --table staging.claims --columns claim_id,member_id,amount --reprocess-failures

# Never offer a known-bad file again
fileledger --importer claims acknowledge /data/claims/20240315_claims.csv \
  --reason "superseded by the 2024-03-16 resend"

# Inspect the latest batch
fileledger --importer claims last-batch
```

## Commands

{}

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
