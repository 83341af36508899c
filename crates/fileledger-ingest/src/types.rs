//! Core types for the import journal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::error::{IngestError, Result};

/// Longest summary the journal keeps for an event
pub const SUMMARY_MAX_LEN: usize = 200;

/// Import event status
///
/// ```text
/// Unknown --(reprocess unknowns)--> Available --> Pending --> Complete
///                                       |            |
///                                       +--> Error <-+
///                                              |
///                     Available <--(reprocess failures)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStatus {
    Unknown,
    Available,
    Pending,
    Error,
    Complete,
}

impl ImportStatus {
    /// Key stored in the journal's `status_key` column
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Unknown => "Unknown",
            ImportStatus::Available => "Available",
            ImportStatus::Pending => "Pending",
            ImportStatus::Error => "Error",
            ImportStatus::Complete => "Complete",
        }
    }

    /// Parse a stored key; unrecognised keys yield `None`
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(ImportStatus::Unknown),
            "available" => Some(ImportStatus::Available),
            "pending" => Some(ImportStatus::Pending),
            "error" => Some(ImportStatus::Error),
            "complete" => Some(ImportStatus::Complete),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        use ImportStatus::*;
        matches!(
            (self, next),
            (Unknown, Available)
                | (Available, Pending)
                | (Pending, Complete)
                | (Pending, Error)
                | (Available, Error)
                | (Error, Available)
        )
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of import attempts made by one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub importer_name: String,
    pub created_moment: DateTime<Utc>,
    /// Events attached to the batch; computed on read
    pub total_events: i64,
}

/// Content digest of a file on disk, with the metadata captured alongside it.
///
/// Two values are equal when their digests are equal, whatever the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    pub path: PathBuf,
    pub hash: String,
    pub byte_length: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl FileHash {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl PartialEq for FileHash {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for FileHash {}

impl Hash for FileHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

/// Journal row tracking one file's import lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportEvent {
    pub id: i64,
    pub content_hash: String,
    pub original_name: String,
    pub source_path: String,
    pub created_moment: Option<DateTime<Utc>>,
    pub last_write_moment: Option<DateTime<Utc>>,
    pub byte_length: i64,
    pub record_count: i64,
    pub import_moment: DateTime<Utc>,
    pub importer_name: String,
    pub importer_version: String,
    pub status: ImportStatus,
    /// Batch that most recently touched the event
    pub batch_id: i64,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub error_line: Option<i64>,
}

impl ImportEvent {
    /// Move to `next`, rejecting anything the state machine does not allow
    pub fn transition(&mut self, next: ImportStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(IngestError::inconsistency(format!(
                "import event {} ({}) cannot move from {} to {}",
                self.id, self.content_hash, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Promote an unresolved event when the caller opted into reprocessing
    /// unknowns. Only the in-memory copy changes.
    pub fn ensure_status(&mut self, batch: &Batch, reprocess_unknowns: bool) {
        if self.status == ImportStatus::Unknown && reprocess_unknowns {
            self.status = ImportStatus::Available;
            self.batch_id = batch.id;
        }
    }

    /// Reopen a failed event for another attempt in `batch`
    pub fn reopen_failed(&mut self, batch: &Batch) -> Result<()> {
        self.transition(ImportStatus::Available)?;
        self.batch_id = batch.id;
        self.record_count = 0;
        self.error_line = None;
        Ok(())
    }

    /// Record a failure message, keeping the first one in `notes`
    pub(crate) fn record_failure(&mut self, error: &crate::error::IngestError) {
        let message = format!("Error, Exception: {}", error);
        if self.notes.is_none() {
            self.notes = Some(message.clone());
        }
        self.summary = Some(truncate(&message, SUMMARY_MAX_LEN));
        if let Some(line) = error.line_number() {
            self.error_line = i64::try_from(line).ok();
        }
        self.record_count = 0;
    }

    pub(crate) fn record_success(&mut self, record_count: i64) {
        self.record_count = record_count;
        self.summary = Some(truncate(
            &format!("Success, Loaded {} records", record_count),
            SUMMARY_MAX_LEN,
        ));
        self.error_line = None;
    }
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Per-file context handed to parsers, persisters and record hooks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    pub import_id: i64,
    pub file_path: PathBuf,
    pub byte_length: u64,
    pub content_hash: String,
}

impl ImportContext {
    pub fn for_event(event: &ImportEvent, file: &FileHash) -> Self {
        Self {
            import_id: event.id,
            file_path: file.path.clone(),
            byte_length: file.byte_length,
            content_hash: file.hash.clone(),
        }
    }
}

/// Outcome of a successful persister call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistenceResult {
    pub total_records: u64,
}

/// Counts reported at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BatchSummary {
    pub batch_id: i64,
    pub total: usize,
    pub complete: usize,
    pub error: usize,
    pub unavailable: usize,
}

impl BatchSummary {
    pub fn pass(&self) -> bool {
        self.error == 0
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch {}: {}. {} files, {} complete, {} errors, {} unavailable",
            self.batch_id,
            if self.pass() { "SUCCESS" } else { "FAILURE" },
            self.total,
            self.complete,
            self.error,
            self.unavailable
        )
    }
}
