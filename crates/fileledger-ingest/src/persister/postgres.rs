//! PostgreSQL persister using batched multi-row inserts

use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{Persister, PersisterFactory};
use crate::error::{is_string_truncation, IngestError, Result};
use crate::parser::RecordStream;
use crate::record::{FieldValue, ImportRecord, RecordMapping};
use crate::types::{ImportContext, PersistenceResult};

/// Rows per insert statement
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// PostgreSQL wire protocol limit on bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

type Row = Vec<FieldValue>;

pub struct PgPersister {
    pool: PgPool,
    mapping: Arc<RecordMapping>,
    chunk_size: usize,
}

impl PgPersister {
    pub fn new(pool: PgPool, mapping: Arc<RecordMapping>, chunk_size: usize) -> Self {
        let max_rows = (MAX_BIND_PARAMS / mapping.columns.len().max(1)).max(1);
        Self {
            pool,
            chunk_size: chunk_size.clamp(1, max_rows),
            mapping,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn insert_prefix(&self) -> String {
        let columns = self
            .mapping
            .columns
            .iter()
            .map(|c| quote_ident(&c.destination))
            .collect::<Vec<_>>()
            .join(", ");
        format!("INSERT INTO {} ({}) ", quote_table(&self.mapping.table), columns)
    }

    async fn write_all<R: ImportRecord>(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        records: &mut dyn RecordStream<R>,
    ) -> Result<u64> {
        let mut total = 0u64;
        let mut chunk: Vec<Row> = Vec::with_capacity(self.chunk_size);

        while let Some(record) = records.next_record().await? {
            chunk.push(self.mapping.values(&record)?);
            if chunk.len() >= self.chunk_size {
                total += self.flush(tx, &chunk).await?;
                chunk.clear();
            }
        }
        if !chunk.is_empty() {
            total += self.flush(tx, &chunk).await?;
        }

        Ok(total)
    }

    async fn flush(&self, tx: &mut Transaction<'_, Postgres>, chunk: &[Row]) -> Result<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(self.insert_prefix());
        builder.push_values(chunk, |mut row_builder, row| {
            for value in row {
                push_field(&mut row_builder, value);
            }
        });

        match builder.build().execute(&mut **tx).await {
            Ok(result) => {
                debug!(table = %self.mapping.table, rows = result.rows_affected(), "Inserted chunk");
                Ok(result.rows_affected())
            },
            Err(e) if is_string_truncation(&e) => Err(self.diagnose_oversized(chunk, e).await),
            Err(e) => Err(IngestError::from_sink(e)),
        }
    }

    /// Name the column whose value overflowed. Runs on the pool, because the
    /// failed transaction rejects further statements.
    async fn diagnose_oversized(&self, chunk: &[Row], original: sqlx::Error) -> IngestError {
        let limits = match column_limits(&self.pool, &self.mapping.table).await {
            Ok(limits) => limits,
            Err(e) => {
                warn!(table = %self.mapping.table, error = %e, "Unable to read column limits");
                return IngestError::Persistence(original.to_string());
            },
        };

        find_oversized(&self.mapping, &limits, chunk)
            .unwrap_or_else(|| IngestError::Persistence(original.to_string()))
    }
}

#[async_trait]
impl<R: ImportRecord> Persister<R> for PgPersister {
    async fn write_to_server(
        self: Box<Self>,
        context: &ImportContext,
        records: &mut dyn RecordStream<R>,
    ) -> Result<PersistenceResult> {
        let mut tx = self.pool.begin().await.map_err(IngestError::from_sink)?;

        match self.write_all(&mut tx, records).await {
            Ok(total) => {
                tx.commit().await.map_err(IngestError::from_sink)?;
                info!(
                    table = %self.mapping.table,
                    import_id = context.import_id,
                    rows = total,
                    "Committed records"
                );
                Ok(PersistenceResult {
                    total_records: total,
                })
            },
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(import_id = context.import_id, error = %rollback, "Rollback failed");
                }
                Err(e)
            },
        }
    }
}

/// Builds one [`PgPersister`] per file, sharing the pool and mapping
#[derive(Clone)]
pub struct PgPersisterFactory {
    pool: PgPool,
    mapping: Arc<RecordMapping>,
    chunk_size: usize,
}

impl PgPersisterFactory {
    pub fn new(pool: PgPool, mapping: RecordMapping) -> Result<Self> {
        mapping.validate()?;
        Ok(Self {
            pool,
            mapping: Arc::new(mapping),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

#[async_trait]
impl<R: ImportRecord> PersisterFactory<R> for PgPersisterFactory {
    async fn create(&self) -> Result<Box<dyn Persister<R>>> {
        Ok(Box::new(PgPersister::new(
            self.pool.clone(),
            Arc::clone(&self.mapping),
            self.chunk_size,
        )))
    }
}

fn push_field<'args>(builder: &mut Separated<'_, 'args, Postgres, &'static str>, value: &FieldValue) {
    match value {
        FieldValue::Null => {
            builder.push("NULL");
        },
        FieldValue::Text(v) => {
            builder.push_bind(v.clone());
        },
        FieldValue::Integer(v) => {
            builder.push_bind(*v);
        },
        FieldValue::Float(v) => {
            builder.push_bind(*v);
        },
        FieldValue::Boolean(v) => {
            builder.push_bind(*v);
        },
        FieldValue::Date(v) => {
            builder.push_bind(*v);
        },
        FieldValue::Timestamp(v) => {
            builder.push_bind(*v);
        },
    }
}

/// Double-quote an identifier for use in generated SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a possibly schema-qualified table name
pub fn quote_table(table: &str) -> String {
    table
        .split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}

fn split_table(table: &str) -> (Option<&str>, &str) {
    match table.rsplit_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

/// Maximum character lengths of the table's length-limited columns
async fn column_limits(pool: &PgPool, table: &str) -> Result<HashMap<String, i64>> {
    let (schema, name) = split_table(table);
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT column_name::TEXT, character_maximum_length::BIGINT
        FROM information_schema.columns
        WHERE table_name = $1
          AND table_schema = COALESCE($2::TEXT, current_schema()::TEXT)
          AND character_maximum_length IS NOT NULL
        "#,
    )
    .bind(name)
    .bind(schema)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}

fn find_oversized(
    mapping: &RecordMapping,
    limits: &HashMap<String, i64>,
    chunk: &[Row],
) -> Option<IngestError> {
    chunk.iter().find_map(|row| {
        mapping.columns.iter().zip(row).find_map(|(column, value)| {
            let max_length = *limits.get(&column.destination)?;
            let len = i64::try_from(value.text_len()?).ok()?;
            (len > max_length).then(|| IngestError::OversizedField {
                column: column.destination.clone(),
                max_length,
            })
        })
    })
}
