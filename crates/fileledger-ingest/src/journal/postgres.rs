//! PostgreSQL-backed journal
//!
//! Uniqueness of `(importer_name, content_hash)` is enforced by the schema, so
//! concurrent importers racing on the same file resolve to a single row: the
//! insert is `ON CONFLICT DO NOTHING` and the row is always re-selected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashSet;
use tracing::{debug, info};

use super::{
    acknowledge_summary, resolve_status, stored_transition_allowed, Journal, JournalOptions,
};
use crate::error::{IngestError, Result};
use crate::types::{Batch, FileHash, ImportEvent, ImportStatus};

#[derive(Debug, FromRow)]
struct EventRow {
    id: i64,
    content_hash: String,
    original_name: String,
    source_path: String,
    created_moment: Option<DateTime<Utc>>,
    last_write_moment: Option<DateTime<Utc>>,
    byte_length: i64,
    record_count: i64,
    import_moment: DateTime<Utc>,
    importer_name: String,
    importer_version: String,
    status_key: Option<String>,
    summary: Option<String>,
    notes: Option<String>,
    error_line: Option<i64>,
    latest_batch_id: Option<i64>,
}

impl EventRow {
    fn into_event(self, active_batch: &Batch) -> ImportEvent {
        let in_active_batch = self.latest_batch_id == Some(active_batch.id);
        ImportEvent {
            status: resolve_status(self.status_key.as_deref(), in_active_batch, self.record_count),
            batch_id: self.latest_batch_id.unwrap_or(active_batch.id),
            id: self.id,
            content_hash: self.content_hash,
            original_name: self.original_name,
            source_path: self.source_path,
            created_moment: self.created_moment,
            last_write_moment: self.last_write_moment,
            byte_length: self.byte_length,
            record_count: self.record_count,
            import_moment: self.import_moment,
            importer_name: self.importer_name,
            importer_version: self.importer_version,
            summary: self.summary,
            notes: self.notes,
            error_line: self.error_line,
        }
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: i64,
    importer_name: String,
    created_moment: DateTime<Utc>,
    total_events: i64,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Batch {
            id: row.id,
            importer_name: row.importer_name,
            created_moment: row.created_moment,
            total_events: row.total_events,
        }
    }
}

const SELECT_EVENT: &str = r#"
    SELECT
        e.id, e.content_hash, e.original_name, e.source_path, e.created_moment,
        e.last_write_moment, e.byte_length, e.record_count, e.import_moment,
        e.importer_name, e.importer_version, e.status_key, e.summary, e.notes,
        e.error_line,
        (SELECT MAX(be.batch_id) FROM import_batch_event be WHERE be.event_id = e.id)
            AS latest_batch_id
    FROM import_event e
    WHERE e.importer_name = $1 AND e.content_hash = $2
"#;

pub struct PgJournal {
    pool: PgPool,
    options: JournalOptions,
}

impl PgJournal {
    pub fn new(pool: PgPool, options: JournalOptions) -> Self {
        Self { pool, options }
    }

    /// Apply the journal schema migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn attach(tx: &mut Transaction<'_, Postgres>, batch_id: i64, event_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO import_batch_event (batch_id, event_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(batch_id)
        .bind(event_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_event(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &ImportEvent,
    ) -> Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO import_event (
                content_hash, original_name, source_path, created_moment, last_write_moment,
                byte_length, record_count, import_moment, importer_name, importer_version,
                status_key, summary, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (importer_name, content_hash) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&event.content_hash)
        .bind(&event.original_name)
        .bind(&event.source_path)
        .bind(event.created_moment)
        .bind(event.last_write_moment)
        .bind(event.byte_length)
        .bind(event.record_count)
        .bind(event.import_moment)
        .bind(&event.importer_name)
        .bind(&event.importer_version)
        .bind(event.status.as_str())
        .bind(&event.summary)
        .bind(&event.notes)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(id)
    }

    /// Load the single row for `hash`; anything other than one row is inconsistent
    async fn load_event(&self, hash: &str, active_batch: &Batch) -> Result<ImportEvent> {
        let mut rows: Vec<EventRow> = sqlx::query_as(SELECT_EVENT)
            .bind(&self.options.importer_name)
            .bind(hash)
            .fetch_all(&self.pool)
            .await?;

        match rows.len() {
            1 => Ok(rows.remove(0).into_event(active_batch)),
            n => Err(IngestError::inconsistency(format!(
                "expected one import event for hash {}, found {}",
                hash, n
            ))),
        }
    }

    /// Write status columns after checking the stored status under a row lock
    async fn update_status(&self, event: &ImportEvent, status: ImportStatus) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let stored: Option<Option<String>> = sqlx::query_scalar(
            "SELECT status_key FROM import_event WHERE id = $1 AND importer_name = $2 FOR UPDATE",
        )
        .bind(event.id)
        .bind(&self.options.importer_name)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(stored) = stored else {
            return Err(IngestError::inconsistency(format!(
                "import event {} not found",
                event.id
            )));
        };
        if !stored_transition_allowed(stored.as_deref(), status) {
            return Err(IngestError::inconsistency(format!(
                "import event {} is {} in the journal and cannot move to {}",
                event.id,
                stored.as_deref().unwrap_or("unset"),
                status
            )));
        }

        let updated = sqlx::query(
            r#"
            UPDATE import_event SET
                status_key = $3,
                record_count = $4,
                summary = $5,
                notes = $6,
                error_line = $7
            WHERE id = $1 AND importer_name = $2
            "#,
        )
        .bind(event.id)
        .bind(&self.options.importer_name)
        .bind(status.as_str())
        .bind(event.record_count)
        .bind(&event.summary)
        .bind(&event.notes)
        .bind(event.error_line)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated != 1 {
            return Err(IngestError::inconsistency(format!(
                "import event {} could not be moved to {} ({} rows updated)",
                event.id, status, updated
            )));
        }

        Self::attach(&mut tx, event.batch_id, event.id).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Journal for PgJournal {
    fn importer_name(&self) -> &str {
        &self.options.importer_name
    }

    async fn new_batch(&self) -> Result<Batch> {
        let row: BatchRow = sqlx::query_as(
            r#"
            INSERT INTO import_batch (importer_name, created_moment)
            VALUES ($1, NOW())
            RETURNING id, importer_name, created_moment, 0::BIGINT AS total_events
            "#,
        )
        .bind(&self.options.importer_name)
        .fetch_one(&self.pool)
        .await?;

        info!(batch_id = row.id, importer = %row.importer_name, "Created import batch");
        Ok(row.into())
    }

    async fn existing_hashes(
        &self,
        exclude_unknowns: bool,
        exclude_failures: bool,
    ) -> Result<HashSet<String>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT content_hash
            FROM import_event
            WHERE importer_name = $1
              AND NOT ($2 AND COALESCE(status_key, '') = 'Unknown')
              AND NOT ($3 AND COALESCE(status_key, '') = 'Error')
            "#,
        )
        .bind(&self.options.importer_name)
        .bind(exclude_unknowns)
        .bind(exclude_failures)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = hashes.len(), "Loaded journaled hashes");
        Ok(hashes.into_iter().collect())
    }

    async fn new_or_existing_event(
        &self,
        file: &FileHash,
        batch: &Batch,
        reprocess_unknowns: bool,
    ) -> Result<ImportEvent> {
        let draft = self.options.draft_event(file, batch);

        let mut tx = self.pool.begin().await?;
        if let Some(id) = self.insert_event(&mut tx, &draft).await? {
            Self::attach(&mut tx, batch.id, id).await?;
            debug!(event_id = id, hash = %file.hash, "Journaled new import event");
        }
        tx.commit().await?;

        let mut event = self.load_event(&file.hash, batch).await?;
        event.ensure_status(batch, reprocess_unknowns);
        Ok(event)
    }

    async fn pend(&self, mut event: ImportEvent, batch: &Batch) -> Result<ImportEvent> {
        event.transition(ImportStatus::Pending)?;
        event.batch_id = batch.id;
        self.update_status(&event, ImportStatus::Pending).await?;
        Ok(event)
    }

    async fn close(&self, mut event: ImportEvent, record_count: u64) -> Result<ImportEvent> {
        event.transition(ImportStatus::Complete)?;
        event.record_success(i64::try_from(record_count).unwrap_or(i64::MAX));
        self.update_status(&event, ImportStatus::Complete).await?;
        Ok(event)
    }

    async fn fail(&self, mut event: ImportEvent, error: &IngestError) -> Result<ImportEvent> {
        event.transition(ImportStatus::Error)?;
        event.record_failure(error);
        self.update_status(&event, ImportStatus::Error).await?;
        Ok(event)
    }

    async fn last_batch(&self) -> Result<Option<Batch>> {
        let row: Option<BatchRow> = sqlx::query_as(
            r#"
            SELECT
                b.id, b.importer_name, b.created_moment,
                (SELECT COUNT(*) FROM import_batch_event be WHERE be.batch_id = b.id) AS total_events
            FROM import_batch b
            WHERE b.importer_name = $1
            ORDER BY b.id DESC
            LIMIT 1
            "#,
        )
        .bind(&self.options.importer_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Batch::from))
    }

    async fn acknowledge(
        &self,
        file: &FileHash,
        batch: &Batch,
        reason: &str,
    ) -> Result<ImportEvent> {
        let mut draft = self.options.draft_event(file, batch);
        draft.status = ImportStatus::Complete;
        draft.summary = Some(acknowledge_summary(reason));
        draft.notes = Some(reason.to_string());

        let mut tx = self.pool.begin().await?;
        let Some(id) = self.insert_event(&mut tx, &draft).await? else {
            return Err(IngestError::AlreadyJournaled {
                content_hash: file.hash.clone(),
            });
        };
        Self::attach(&mut tx, batch.id, id).await?;
        tx.commit().await?;

        info!(event_id = id, hash = %file.hash, file = %draft.original_name, "Acknowledged file without importing");
        self.load_event(&file.hash, batch).await
    }
}
