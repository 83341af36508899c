//! Durable record of every batch and file the importer has seen
//!
//! A journal is scoped to one importer kind: content hashes are unique per
//! importer, so two importers may load the same file independently.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

use crate::error::{IngestError, Result};
use crate::types::{Batch, FileHash, ImportEvent, ImportStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryJournal;
pub use postgres::PgJournal;

/// File names starting with `yyyyMMdd`, `yyyyMMddHHmm` or `yyyyMMddHHmmss` then `_`
pub const IMPORT_MOMENT_PATTERN: &str = r"^(?<date>\d{8})(?<time>\d{4,6})?_[\w\-. ]+$";

#[async_trait]
pub trait Journal: Send + Sync {
    /// Importer kind this journal is scoped to
    fn importer_name(&self) -> &str;

    async fn new_batch(&self) -> Result<Batch>;

    /// Hashes already journaled for this importer, optionally leaving out
    /// events stored as `Unknown` or `Error`
    async fn existing_hashes(
        &self,
        exclude_unknowns: bool,
        exclude_failures: bool,
    ) -> Result<HashSet<String>>;

    /// Create the event for `file` in `Available`, or load the existing one
    /// with its status resolved by [`resolve_status`]
    async fn new_or_existing_event(
        &self,
        file: &FileHash,
        batch: &Batch,
        reprocess_unknowns: bool,
    ) -> Result<ImportEvent>;

    /// Mark the event `Pending` in `batch`; durable before any record is written
    async fn pend(&self, event: ImportEvent, batch: &Batch) -> Result<ImportEvent>;

    /// Mark the event `Complete` with the number of records loaded
    async fn close(&self, event: ImportEvent, record_count: u64) -> Result<ImportEvent>;

    /// Mark the event `Error` and keep the failure message
    async fn fail(&self, event: ImportEvent, error: &IngestError) -> Result<ImportEvent>;

    /// Most recent batch for this importer
    async fn last_batch(&self) -> Result<Option<Batch>>;

    /// Journal a known-bad file as `Complete` with no records so it is never
    /// offered again
    async fn acknowledge(&self, file: &FileHash, batch: &Batch, reason: &str)
        -> Result<ImportEvent>;
}

/// Identity and behaviour shared by journal implementations
#[derive(Debug, Clone)]
pub struct JournalOptions {
    pub importer_name: String,
    pub importer_version: String,
    /// Take `import_moment` from a timestamp at the start of the file name
    pub derive_moment_from_name: bool,
}

impl JournalOptions {
    pub fn new(importer_name: impl Into<String>) -> Self {
        Self {
            importer_name: importer_name.into(),
            importer_version: env!("CARGO_PKG_VERSION").to_string(),
            derive_moment_from_name: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.importer_version = version.into();
        self
    }

    pub fn derive_moment_from_name(mut self, derive: bool) -> Self {
        self.derive_moment_from_name = derive;
        self
    }

    /// Unsaved event for a file seen for the first time
    pub(crate) fn draft_event(&self, file: &FileHash, batch: &Batch) -> ImportEvent {
        let original_name = file.file_name();
        ImportEvent {
            id: 0,
            content_hash: file.hash.clone(),
            import_moment: resolve_import_moment(&original_name, self.derive_moment_from_name),
            original_name,
            source_path: file.path.to_string_lossy().into_owned(),
            created_moment: file.created,
            last_write_moment: file.modified,
            byte_length: i64::try_from(file.byte_length).unwrap_or(i64::MAX),
            record_count: 0,
            importer_name: self.importer_name.clone(),
            importer_version: self.importer_version.clone(),
            status: ImportStatus::Available,
            batch_id: batch.id,
            summary: None,
            notes: None,
            error_line: None,
        }
    }
}

/// Effective status of a stored event.
///
/// Rows written before statuses were tracked have no `status_key`; their state
/// is inferred from batch membership and the loaded record count.
pub fn resolve_status(
    stored: Option<&str>,
    in_active_batch: bool,
    record_count: i64,
) -> ImportStatus {
    match stored.map(str::trim).filter(|s| !s.is_empty()) {
        None if in_active_batch => ImportStatus::Available,
        None if record_count > 0 => ImportStatus::Complete,
        None => ImportStatus::Error,
        Some(key) => ImportStatus::from_key(key).unwrap_or(ImportStatus::Unknown),
    }
}

/// Whether the stored row may be written as `next`.
///
/// Checked against the journal's copy, not the caller's, so two runs holding
/// the same `Available` event cannot both pend it. Unknown and failed rows are
/// reopened in memory before pending; rows without a status can only be pended.
pub fn stored_transition_allowed(stored: Option<&str>, next: ImportStatus) -> bool {
    let Some(key) = stored.map(str::trim).filter(|s| !s.is_empty()) else {
        return next == ImportStatus::Pending;
    };
    let current = ImportStatus::from_key(key).unwrap_or(ImportStatus::Unknown);
    current.can_transition_to(next)
        || (next == ImportStatus::Pending && current.can_transition_to(ImportStatus::Available))
}

/// Timestamp embedded at the start of a file name, read as local time
pub fn import_moment_from_name(name: &str) -> Option<DateTime<Utc>> {
    let pattern = Regex::new(IMPORT_MOMENT_PATTERN).ok()?;
    let caps = pattern.captures(name)?;
    let date = caps.name("date")?.as_str();
    let time = caps.name("time").map(|m| m.as_str()).unwrap_or("");

    // HHmm is minutes past the hour, so pad seconds on the right
    let stamp = format!("{}{:0<6}", date, time);
    let naive = NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

pub(crate) fn resolve_import_moment(name: &str, derive_from_name: bool) -> DateTime<Utc> {
    if derive_from_name {
        match import_moment_from_name(name) {
            Some(moment) => return moment,
            None => warn!(
                file = %name,
                "File name does not start with a valid yyyyMMdd[HHmm[ss]]_ timestamp, using current time"
            ),
        }
    }
    Utc::now()
}

/// Acknowledgement summary, kept within the journal's summary column
pub(crate) fn acknowledge_summary(reason: &str) -> String {
    crate::types::truncate(
        &format!("Acknowledged, not imported: {}", reason),
        crate::types::SUMMARY_MAX_LEN,
    )
}
