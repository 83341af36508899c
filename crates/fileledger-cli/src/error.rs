//! Error types for the fileledger CLI
//!
//! Messages are user-facing and say what to do next.

use fileledger_common::LedgerError;
use fileledger_ingest::IngestError;
use thiserror::Error;

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Common(#[from] LedgerError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The run finished but some files failed
    #[error("{0}. Fix the data and rerun with --reprocess-failures, or record the files with 'fileledger acknowledge'.")]
    BatchFailed(String),

    #[error("{failed} of {total} files could not be acknowledged. See the log for details.")]
    AcknowledgeFailed { failed: usize, total: usize },
}

impl CliError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
