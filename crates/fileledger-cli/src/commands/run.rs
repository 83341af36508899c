//! `fileledger run` command implementation
//!
//! Imports every new delimited file under a directory into one table.

use async_trait::async_trait;
use fileledger_ingest::config::ImportConfig;
use fileledger_ingest::hash::FileHasher;
use fileledger_ingest::journal::{Journal, JournalOptions, MemoryJournal};
use fileledger_ingest::orchestrator::{extension_filter, FileImporter};
use fileledger_ingest::parser::{DelimitedOptions, DelimitedParser, RecordStream};
use fileledger_ingest::persister::{Persister, PersisterFactory, PgPersisterFactory};
use fileledger_ingest::policy::ExceptionPolicy;
use fileledger_ingest::{BatchSummary, ImportContext, PersistenceResult};
use std::sync::Arc;
use tracing::info;

use super::{algorithm_or, import_config, open_journal};
use crate::error::{CliError, Result};
use crate::row::{positional_mapping, CsvRow};
use crate::RunArgs;

/// Run one import batch and print its summary
pub async fn run(args: &RunArgs, importer: Option<&str>) -> Result<BatchSummary> {
    let mut config = import_config(importer)?;
    args.apply(&mut config)?;
    config.validate()?;

    let policy: ExceptionPolicy = config.on_error.parse()?;
    let parser = DelimitedParser::<CsvRow>::new(args.delimited_options()?);
    let options = JournalOptions::new(&config.importer_name)
        .derive_moment_from_name(config.derive_moment_from_name);

    let journal: Arc<dyn Journal>;
    let persisters: Arc<dyn PersisterFactory<CsvRow>>;
    if args.dry_run {
        info!(root = %config.root.display(), "Dry run: nothing will be journaled or written");
        journal = Arc::new(MemoryJournal::new(options));
        persisters = Arc::new(CountingPersisterFactory);
    } else {
        let pg = open_journal(options).await?;
        let mapping = positional_mapping(
            args.table.as_deref().unwrap_or_default(),
            &args.columns,
            args.import_id_column(),
        );
        persisters = Arc::new(
            PgPersisterFactory::new(pg.pool().clone(), mapping)?.with_chunk_size(config.batch_size),
        );
        journal = Arc::new(pg);
    }

    let importer = FileImporter::new(
        config.clone(),
        FileHasher::new(config.hash_algorithm),
        journal,
        Arc::new(parser),
        persisters,
        policy,
    )
    .with_filter(extension_filter(args.extensions.clone()));

    let summary = importer.run().await?;
    println!("{}", summary);

    if summary.pass() {
        Ok(summary)
    } else {
        Err(CliError::BatchFailed(summary.to_string()))
    }
}

impl RunArgs {
    /// Layer flags over settings loaded from the environment
    pub fn apply(&self, config: &mut ImportConfig) -> Result<()> {
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        config.recursive |= self.recursive;
        config.reprocess_unknowns |= self.reprocess_unknowns;
        config.reprocess_failures |= self.reprocess_failures;
        config.derive_moment_from_name |= self.derive_moment_from_name;
        config.hash_algorithm = algorithm_or(self.algorithm.as_deref(), config.hash_algorithm)?;
        if let Some(on_error) = &self.on_error {
            config.on_error = on_error.clone();
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(concurrency) = self.hash_concurrency {
            config.hash_concurrency = concurrency;
        }
        Ok(())
    }

    pub fn delimited_options(&self) -> Result<DelimitedOptions> {
        Ok(DelimitedOptions {
            delimiter: parse_delimiter(&self.delimiter)?,
            has_header: !self.no_header,
            ..DelimitedOptions::default()
        })
    }

    pub fn import_id_column(&self) -> Option<&str> {
        let column = self.import_id_column.trim();
        (!column.is_empty() && !column.eq_ignore_ascii_case("none")).then_some(column)
    }
}

fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "tab" | "\\t" | "\t" => Ok(b'\t'),
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii() => Ok(c as u8),
                _ => Err(CliError::invalid_argument(format!(
                    "delimiter must be a single ASCII character or 'tab', got '{}'",
                    value
                ))),
            }
        },
    }
}

/// Consumes every record without writing anything
struct CountingPersisterFactory;

struct CountingPersister;

#[async_trait]
impl Persister<CsvRow> for CountingPersister {
    async fn write_to_server(
        self: Box<Self>,
        context: &ImportContext,
        records: &mut dyn RecordStream<CsvRow>,
    ) -> fileledger_ingest::Result<PersistenceResult> {
        let mut total_records = 0u64;
        while records.next_record().await?.is_some() {
            total_records += 1;
        }
        info!(file = %context.file_path.display(), records = total_records, "Parsed file (dry run)");
        Ok(PersistenceResult { total_records })
    }
}

#[async_trait]
impl PersisterFactory<CsvRow> for CountingPersisterFactory {
    async fn create(&self) -> fileledger_ingest::Result<Box<dyn Persister<CsvRow>>> {
        Ok(Box::new(CountingPersister))
    }
}
