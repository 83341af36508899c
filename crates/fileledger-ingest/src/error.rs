//! Error types for the import engine

use thiserror::Error;

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// SQLSTATE raised by PostgreSQL for `string_data_right_truncation`
pub const SQLSTATE_STRING_TRUNCATION: &str = "22001";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The journal did not resolve to exactly one row, or a status change was illegal
    #[error("Journal inconsistency: {0}")]
    JournalInconsistency(String),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("Column: {column} contains data with a length greater than: {max_length}")]
    OversizedField { column: String, max_length: i64 },

    #[error("Sink unreachable: {0}")]
    Connectivity(String),

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("An import event for hash {content_hash} already exists")]
    AlreadyJournaled { content_hash: String },

    /// Journal-side database failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl IngestError {
    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::JournalInconsistency(message.into())
    }

    pub fn parse(line: u64, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Classify a sink-side sqlx failure into the persister error vocabulary.
    ///
    /// Oversized values need the column name, so callers that can look it up
    /// handle SQLSTATE 22001 before falling back to this.
    pub fn from_sink(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Connectivity(error.to_string()),
            _ => Self::Persistence(error.to_string()),
        }
    }

    /// Line number carried by the error, when known
    pub fn line_number(&self) -> Option<u64> {
        match self {
            Self::Parse { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Errors from the journal itself abort the run regardless of policy
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::JournalInconsistency(_) | Self::Database(_) | Self::Migration(_) | Self::Config(_)
        )
    }
}

impl From<fileledger_common::LedgerError> for IngestError {
    fn from(error: fileledger_common::LedgerError) -> Self {
        match error {
            fileledger_common::LedgerError::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}

/// Check if the error is a unique constraint violation
pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = error {
        return db_err.is_unique_violation();
    }
    false
}

/// Check if the error is PostgreSQL's "value too long for type" failure
pub fn is_string_truncation(error: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = error {
        return db_err.code().as_deref() == Some(SQLSTATE_STRING_TRUNCATION);
    }
    false
}
