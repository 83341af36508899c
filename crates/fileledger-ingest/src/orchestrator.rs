//! Import orchestration
//!
//! One run walks the pipeline
//!
//! ```text
//! discover -> hash -> dedup -> per file: pend -> parse + persist -> close | fail -> summarize
//! ```
//!
//! Hashing runs with bounded concurrency; files are then imported one at a
//! time in path order. Every file that reaches the persister ends the run
//! journaled as either `Complete` or `Error`. The exception policy only
//! decides whether the rest of the batch still runs.

use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use walkdir::WalkDir;

use crate::config::ImportConfig;
use crate::error::{IngestError, Result};
use crate::hash::FileHasher;
use crate::journal::Journal;
use crate::parser::{ReadHooks, RecordParser};
use crate::persister::PersisterFactory;
use crate::policy::ExceptionPolicy;
use crate::record::ImportRecord;
use crate::types::{BatchSummary, FileHash, ImportContext, ImportEvent, ImportStatus, PersistenceResult};

pub type FileFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;
pub type HookFactory<R> = Arc<dyn Fn(&ImportContext) -> ReadHooks<R> + Send + Sync>;

/// How a single file ended
#[derive(Debug)]
pub enum FileOutcome {
    Complete(u64),
    Failed(IngestError),
    Unavailable(ImportStatus),
}

pub struct FileImporter<R: ImportRecord> {
    config: ImportConfig,
    hasher: FileHasher,
    journal: Arc<dyn Journal>,
    parser: Arc<dyn RecordParser<R>>,
    persisters: Arc<dyn PersisterFactory<R>>,
    policy: ExceptionPolicy,
    filter: FileFilter,
    hooks: HookFactory<R>,
}

impl<R: ImportRecord> FileImporter<R> {
    pub fn new(
        config: ImportConfig,
        hasher: FileHasher,
        journal: Arc<dyn Journal>,
        parser: Arc<dyn RecordParser<R>>,
        persisters: Arc<dyn PersisterFactory<R>>,
        policy: ExceptionPolicy,
    ) -> Self {
        Self {
            config,
            hasher,
            journal,
            parser,
            persisters,
            policy,
            filter: Arc::new(|_| true),
            hooks: Arc::new(|_| ReadHooks::new()),
        }
    }

    /// Only import files accepted by `filter`
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Path) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Build read hooks for each file
    pub fn with_hooks<F>(mut self, hooks: F) -> Self
    where
        F: Fn(&ImportContext) -> ReadHooks<R> + Send + Sync + 'static,
    {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Import every new file under the configured root.
    ///
    /// Returns the batch summary when the run completes, even if some files
    /// failed. Journal failures, and file failures the policy re-raises, end
    /// the run with an error.
    pub async fn run(&self) -> Result<BatchSummary> {
        let span = info_span!("import_run", importer = %self.journal.importer_name());
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> Result<BatchSummary> {
        let candidates = self.discover().await?;
        let batch = self.journal.new_batch().await?;
        let mut summary = BatchSummary {
            batch_id: batch.id,
            ..BatchSummary::default()
        };

        info!(
            root = %self.config.root.display(),
            files = candidates.len(),
            batch_id = batch.id,
            "Discovered candidate files"
        );

        let hashed = self.hash_all(candidates).await;
        let files = self.dedup(hashed).await?;
        summary.total = files.len();
        info!(files = files.len(), "Files to import after deduplication");

        let mut errors: Vec<String> = Vec::new();

        for (index, file) in files.iter().enumerate() {
            if index % 9 == 0 || index + 1 == files.len() {
                info!(
                    "Processing file {} of {} ({}): {}",
                    index + 1,
                    files.len(),
                    percent(index + 1, files.len()),
                    file.file_name()
                );
            }

            let span = info_span!("import_file", file = %file.file_name(), hash = %file.hash);
            let outcome = self.process_file(&batch, file).instrument(span).await?;

            match outcome {
                FileOutcome::Complete(_) => summary.complete += 1,
                FileOutcome::Unavailable(_) => summary.unavailable += 1,
                FileOutcome::Failed(err) => {
                    summary.error += 1;
                    let message = err.to_string();
                    if !errors.contains(&message) {
                        errors.push(message);
                    }

                    if self.policy.handle(&file.path.display().to_string(), &err) {
                        self.log_summary(&summary, &errors);
                        return Err(err);
                    }
                },
            }
        }

        self.log_summary(&summary, &errors);
        Ok(summary)
    }

    /// Files under the root accepted by the filter, in path order
    async fn discover(&self) -> Result<Vec<PathBuf>> {
        let root = self.config.root.clone();
        if !tokio::fs::metadata(&root).await?.is_dir() {
            return Err(IngestError::config(format!(
                "Import root {} is not a directory",
                root.display()
            )));
        }

        let recursive = self.config.recursive;
        let filter = Arc::clone(&self.filter);

        tokio::task::spawn_blocking(move || {
            let walker = WalkDir::new(&root)
                .min_depth(1)
                .max_depth(if recursive { usize::MAX } else { 1 });

            let mut files: Vec<PathBuf> = walker
                .into_iter()
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable directory entry");
                        None
                    },
                })
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| filter(path))
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| IngestError::Io(std::io::Error::other(e)))
    }

    /// Hash candidates with bounded concurrency, keeping discovery order
    async fn hash_all(&self, candidates: Vec<PathBuf>) -> Vec<FileHash> {
        let hasher = self.hasher;
        let results: Vec<(PathBuf, Result<FileHash>)> = stream::iter(candidates)
            .map(|path| async move {
                let result = hasher.compute(&path).await;
                (path, result)
            })
            .buffered(self.config.hash_concurrency.max(1))
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(path, result)| match result {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unable to hash file, leaving it out of the batch");
                    None
                },
            })
            .collect()
    }

    /// Drop repeated content within the batch and content already journaled
    async fn dedup(&self, files: Vec<FileHash>) -> Result<Vec<FileHash>> {
        let existing = self
            .journal
            .existing_hashes(self.config.reprocess_unknowns, self.config.reprocess_failures)
            .await?;

        let mut seen = HashSet::new();
        let mut fresh = Vec::with_capacity(files.len());
        for file in files {
            if !seen.insert(file.hash.clone()) {
                debug!(path = %file.path.display(), hash = %file.hash, "Duplicate content in batch, skipping");
                continue;
            }
            if existing.contains(&file.hash) {
                debug!(path = %file.path.display(), hash = %file.hash, "Already journaled, skipping");
                continue;
            }
            fresh.push(file);
        }
        Ok(fresh)
    }

    async fn process_file(&self, batch: &crate::types::Batch, file: &FileHash) -> Result<FileOutcome> {
        let mut event = self
            .journal
            .new_or_existing_event(file, batch, self.config.reprocess_unknowns)
            .await?;

        if event.status == ImportStatus::Error && self.config.reprocess_failures {
            event.reopen_failed(batch)?;
        }

        if event.status != ImportStatus::Available {
            report_unavailable(&event, file);
            return Ok(FileOutcome::Unavailable(event.status));
        }

        let mut event = self.journal.pend(event, batch).await?;
        let context = ImportContext::for_event(&event, file);

        let (result, line) = self.import_file(&context).await;
        match result {
            Ok(result) => {
                let event = self.journal.close(event, result.total_records).await?;
                info!(event_id = event.id, records = result.total_records, "Import complete");
                Ok(FileOutcome::Complete(result.total_records))
            },
            Err(err) => {
                if err.line_number().is_none() {
                    event.error_line = line.and_then(|l| i64::try_from(l).ok());
                }
                let event = self.journal.fail(event, &err).await?;
                debug!(event_id = event.id, line = ?event.error_line, "Import event marked failed");
                Ok(FileOutcome::Failed(err))
            },
        }
    }

    /// Parse and persist one file; also returns the last line read
    async fn import_file(&self, context: &ImportContext) -> (Result<PersistenceResult>, Option<u64>) {
        let mut stream = match self.parser.create_reader(context, (self.hooks)(context)).await {
            Ok(stream) => stream,
            Err(e) => return (Err(e), None),
        };
        let persister = match self.persisters.create().await {
            Ok(persister) => persister,
            Err(e) => return (Err(e), None),
        };

        let result = persister.write_to_server(context, stream.as_mut()).await;
        let line = stream.line_number();
        (result, (line > 0).then_some(line))
    }

    fn log_summary(&self, summary: &BatchSummary, errors: &[String]) {
        for message in errors {
            warn!(error = %message, "Import error");
        }

        if summary.pass() {
            info!(
                batch_id = summary.batch_id,
                total = summary.total,
                complete = summary.complete,
                unavailable = summary.unavailable,
                "{}",
                summary
            );
        } else {
            error!(
                batch_id = summary.batch_id,
                total = summary.total,
                complete = summary.complete,
                errors = summary.error,
                unavailable = summary.unavailable,
                "{}. Fix the failing files and rerun with reprocess failures, or record them with `fileledger acknowledge` so they are not offered again",
                summary
            );
        }
    }
}

/// `done` of `total` as a percentage with two decimals
fn percent(done: usize, total: usize) -> String {
    if total == 0 {
        return "100.00%".to_string();
    }
    format!("{:.2}%", done as f64 * 100.0 / total as f64)
}

fn report_unavailable(event: &ImportEvent, file: &FileHash) {
    match event.status {
        ImportStatus::Unknown => warn!(
            event_id = event.id,
            path = %file.path.display(),
            "Import event has an unknown status and may already have loaded records; skipping. Rerun with reprocess unknowns to retry"
        ),
        status => info!(
            event_id = event.id,
            path = %file.path.display(),
            status = %status,
            "Import event is not available, skipping"
        ),
    }
}

/// Journal a known-bad file so later runs never offer it again
pub async fn acknowledge(
    journal: &dyn Journal,
    hasher: &FileHasher,
    path: &Path,
    reason: &str,
) -> Result<ImportEvent> {
    let file = hasher.compute(path).await?;
    let batch = journal.new_batch().await?;
    journal.acknowledge(&file, &batch, reason).await
}

/// Accept files whose extension is in `extensions`.
///
/// Entries may be written `csv`, `.csv` or `*.csv` and match case-insensitively.
/// An empty list accepts every file.
pub fn extension_filter<I, S>(extensions: I) -> impl Fn(&Path) -> bool + Send + Sync + 'static
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let extensions: Vec<String> = extensions
        .into_iter()
        .map(|e| e.as_ref().trim().trim_start_matches('*').trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();

    move |path: &Path| {
        extensions.is_empty()
            || path
                .extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    extensions.iter().any(|e| *e == ext)
                })
                .unwrap_or(false)
    }
}
