//! Error types shared across fileledger crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Main error type for the shared utilities
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Configuration error: {0}")]
    Config(String),
}
