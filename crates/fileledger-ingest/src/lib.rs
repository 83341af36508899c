//! fileledger import engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads batches of flat files into a relational sink exactly once. Files are
//! content-addressed, every attempt is journaled, and each file's records are
//! written in a single transaction, so a rerun after a crash or a failure
//! neither duplicates nor half-loads data.
//!
//! # Components
//!
//! - [`hash::FileHasher`]: streaming content digests
//! - [`journal::Journal`]: batches, import events and their status machine,
//!   with PostgreSQL and in-memory implementations
//! - [`parser::RecordParser`]: turns a file into a forward-only record stream
//! - [`persister::Persister`]: writes one file's records atomically
//! - [`policy::ExceptionPolicy`]: continue or abort when a file fails
//! - [`orchestrator::FileImporter`]: runs the whole pipeline for a directory
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fileledger_ingest::{
//!     config::{DatabaseConfig, ImportConfig},
//!     hash::FileHasher,
//!     journal::{JournalOptions, PgJournal},
//!     orchestrator::FileImporter,
//!     parser::DelimitedParser,
//!     persister::PgPersisterFactory,
//!     policy::ExceptionPolicy,
//!     record::{FieldValue, ImportRecord, RecordMapping},
//! };
//!
//! #[derive(serde::Deserialize)]
//! struct Member {
//!     #[serde(skip)]
//!     import_id: i64,
//!     member_id: String,
//! }
//!
//! impl ImportRecord for Member {
//!     fn import_id(&self) -> i64 { self.import_id }
//!     fn set_import_id(&mut self, id: i64) { self.import_id = id; }
//!     fn field(&self, name: &str) -> Option<FieldValue> {
//!         match name {
//!             "import_id" => Some(self.import_id.into()),
//!             "member_id" => Some(self.member_id.as_str().into()),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! # async fn run() -> fileledger_ingest::Result<()> {
//! let config = ImportConfig::from_env()?;
//! let pool = DatabaseConfig::from_env()?.connect().await?;
//!
//! let journal = PgJournal::new(pool.clone(), JournalOptions::new(&config.importer_name));
//! journal.migrate().await?;
//!
//! let mapping = RecordMapping::new("members").same_names(["import_id", "member_id"]);
//! let importer = FileImporter::<Member>::new(
//!     config.clone(),
//!     FileHasher::new(config.hash_algorithm),
//!     Arc::new(journal),
//!     Arc::new(DelimitedParser::<Member>::default()),
//!     Arc::new(PgPersisterFactory::new(pool, mapping)?),
//!     ExceptionPolicy::Continue,
//! );
//!
//! let summary = importer.run().await?;
//! println!("{}", summary);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hash;
pub mod journal;
pub mod orchestrator;
pub mod parser;
pub mod persister;
pub mod policy;
pub mod progress;
pub mod record;
pub mod types;

pub use error::{IngestError, Result};
pub use types::{Batch, BatchSummary, FileHash, ImportContext, ImportEvent, ImportStatus, PersistenceResult};
