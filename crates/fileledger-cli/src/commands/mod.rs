//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod acknowledge;
pub mod hash;
pub mod last_batch;
pub mod run;

use fileledger_common::HashAlgorithm;
use fileledger_ingest::config::{DatabaseConfig, ImportConfig};
use fileledger_ingest::journal::{JournalOptions, PgJournal};

use crate::error::Result;

/// Import settings from the environment with the global `--importer` applied
pub(crate) fn import_config(importer: Option<&str>) -> Result<ImportConfig> {
    let mut config = ImportConfig::from_env()?;
    if let Some(name) = importer {
        config.importer_name = name.to_string();
    }
    Ok(config)
}

pub(crate) fn algorithm_or(flag: Option<&str>, default: HashAlgorithm) -> Result<HashAlgorithm> {
    match flag {
        Some(value) => Ok(value.parse()?),
        None => Ok(default),
    }
}

/// Connect to the journal database and bring its schema up to date
pub(crate) async fn open_journal(options: JournalOptions) -> Result<PgJournal> {
    let pool = DatabaseConfig::from_env()?.connect().await?;
    let journal = PgJournal::new(pool, options);
    journal.migrate().await?;
    Ok(journal)
}
