//! fileledger Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the fileledger workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`LedgerError`] and the crate [`Result`] alias
//! - **Checksums**: streaming content digests over any reader
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Types**: the [`HashAlgorithm`] used to content-address files
//!
//! # Example
//!
//! ```no_run
//! use fileledger_common::{checksum::compute_file_checksum, HashAlgorithm, Result};
//!
//! fn fingerprint(path: &str) -> Result<String> {
//!     compute_file_checksum(path, HashAlgorithm::Sha384)
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{LedgerError, Result};
pub use types::HashAlgorithm;
