//! Persister contract: write one file's records atomically

use async_trait::async_trait;

use crate::error::Result;
use crate::parser::RecordStream;
use crate::record::ImportRecord;
use crate::types::{ImportContext, PersistenceResult};

pub mod postgres;

pub use postgres::{PgPersister, PgPersisterFactory};

/// Writes every record of one file inside a single transaction.
///
/// The call owns the transaction: it commits only after the stream is fully
/// consumed and rolls back before returning any error, so a failed file
/// leaves nothing behind in the sink.
#[async_trait]
pub trait Persister<R: ImportRecord>: Send {
    async fn write_to_server(
        self: Box<Self>,
        context: &ImportContext,
        records: &mut dyn RecordStream<R>,
    ) -> Result<PersistenceResult>;
}

/// Creates a fresh persister for each file
#[async_trait]
pub trait PersisterFactory<R: ImportRecord>: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Persister<R>>>;
}
