//! `fileledger acknowledge` command implementation
//!
//! Records files as handled so no later run offers them again. Used for data
//! that is known to be bad and will not be corrected.

use fileledger_ingest::hash::FileHasher;
use fileledger_ingest::journal::JournalOptions;
use fileledger_ingest::orchestrator;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{algorithm_or, import_config, open_journal};
use crate::error::{CliError, Result};

pub async fn run(
    files: &[PathBuf],
    reason: &str,
    algorithm: Option<&str>,
    importer: Option<&str>,
) -> Result<()> {
    if reason.trim().is_empty() {
        return Err(CliError::invalid_argument("a reason is required to acknowledge files"));
    }

    let config = import_config(importer)?;
    let hasher = FileHasher::new(algorithm_or(algorithm, config.hash_algorithm)?);
    let journal = open_journal(JournalOptions::new(&config.importer_name)).await?;

    let mut failed = 0;
    for path in files {
        match orchestrator::acknowledge(&journal, &hasher, path, reason).await {
            Ok(event) => {
                info!(event_id = event.id, hash = %event.content_hash, "Acknowledged");
                println!("{}  {} (event {})", event.content_hash, path.display(), event.id);
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to acknowledge file");
                eprintln!("{}: {}", path.display(), e);
                failed += 1;
            },
        }
    }

    if failed > 0 {
        return Err(CliError::AcknowledgeFailed {
            failed,
            total: files.len(),
        });
    }
    Ok(())
}
