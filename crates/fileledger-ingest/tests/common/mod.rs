//! Shared fixtures for fileledger-ingest integration tests
//!
//! - [`Member`]: a small CSV record type
//! - [`CollectingPersisterFactory`]: an in-memory sink that only keeps rows
//!   from files whose write completed, like a committed transaction
//! - [`TestPostgres`]: a PostgreSQL container with the journal schema applied

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use fileledger_ingest::config::ImportConfig;
use fileledger_ingest::error::IngestError;
use fileledger_ingest::hash::FileHasher;
use fileledger_ingest::journal::{Journal, JournalOptions, MemoryJournal};
use fileledger_ingest::orchestrator::FileImporter;
use fileledger_ingest::parser::{DelimitedParser, RecordStream};
use fileledger_ingest::persister::{Persister, PersisterFactory};
use fileledger_ingest::policy::ExceptionPolicy;
use fileledger_ingest::record::{FieldValue, ImportRecord};
use fileledger_ingest::{ImportContext, PersistenceResult};
use serde::Deserialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;

static TRACING: Once = Once::new();

/// Route tracing output through the test harness
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("fileledger_ingest=debug")
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Member {
    #[serde(skip)]
    pub import_id: i64,
    pub member_id: String,
    pub name: String,
    pub age: Option<i32>,
}

impl ImportRecord for Member {
    fn import_id(&self) -> i64 {
        self.import_id
    }

    fn set_import_id(&mut self, import_id: i64) {
        self.import_id = import_id;
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "import_id" => Some(self.import_id.into()),
            "member_id" => Some(self.member_id.as_str().into()),
            "name" => Some(self.name.as_str().into()),
            "age" => Some(self.age.into()),
            _ => None,
        }
    }
}

/// CSV body with a header and `rows` members whose ids start at `first`
pub fn members_csv(first: usize, rows: usize) -> String {
    let mut body = String::from("member_id,name,age\n");
    for i in first..first + rows {
        body.push_str(&format!("M{},Member {},{}\n", i, i, 20 + i % 50));
    }
    body
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

// ============================================================================
// In-memory sink
// ============================================================================

type FailWhen = Arc<dyn Fn(&ImportContext) -> bool + Send + Sync>;

/// Sink that commits a file's rows only when its write completes
#[derive(Clone)]
pub struct CollectingPersisterFactory {
    committed: Arc<Mutex<Vec<Member>>>,
    attempts: Arc<Mutex<Vec<PathBuf>>>,
    fail_when: Option<FailWhen>,
}

impl CollectingPersisterFactory {
    pub fn new() -> Self {
        Self {
            committed: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            fail_when: None,
        }
    }

    /// Fail, after consuming the whole stream, for files matching `predicate`
    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&ImportContext) -> bool + Send + Sync + 'static,
    {
        Self {
            fail_when: Some(Arc::new(predicate)),
            ..Self::new()
        }
    }

    pub fn committed(&self) -> Vec<Member> {
        self.committed.lock().unwrap().clone()
    }

    /// File names handed to a persister, in order
    pub fn attempted_names(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }
}

struct CollectingPersister {
    committed: Arc<Mutex<Vec<Member>>>,
    attempts: Arc<Mutex<Vec<PathBuf>>>,
    fail_when: Option<FailWhen>,
}

#[async_trait]
impl Persister<Member> for CollectingPersister {
    async fn write_to_server(
        self: Box<Self>,
        context: &ImportContext,
        records: &mut dyn RecordStream<Member>,
    ) -> fileledger_ingest::Result<PersistenceResult> {
        self.attempts.lock().unwrap().push(context.file_path.clone());

        let mut staged = Vec::new();
        while let Some(record) = records.next_record().await? {
            staged.push(record);
        }

        if let Some(fail_when) = &self.fail_when {
            if fail_when(context) {
                return Err(IngestError::Persistence(format!(
                    "sink rejected {}",
                    context.file_path.display()
                )));
            }
        }

        let total_records = staged.len() as u64;
        self.committed.lock().unwrap().extend(staged);
        Ok(PersistenceResult { total_records })
    }
}

#[async_trait]
impl PersisterFactory<Member> for CollectingPersisterFactory {
    async fn create(&self) -> fileledger_ingest::Result<Box<dyn Persister<Member>>> {
        Ok(Box::new(CollectingPersister {
            committed: Arc::clone(&self.committed),
            attempts: Arc::clone(&self.attempts),
            fail_when: self.fail_when.clone(),
        }))
    }
}

// ============================================================================
// Importer wiring
// ============================================================================

pub fn import_config(root: &Path) -> ImportConfig {
    ImportConfig {
        root: root.to_path_buf(),
        importer_name: "members".to_string(),
        ..ImportConfig::default()
    }
}

pub fn memory_journal() -> Arc<MemoryJournal> {
    Arc::new(MemoryJournal::new(JournalOptions::new("members")))
}

pub fn importer(
    config: ImportConfig,
    journal: Arc<dyn Journal>,
    sink: &CollectingPersisterFactory,
    policy: ExceptionPolicy,
) -> FileImporter<Member> {
    FileImporter::new(
        config.clone(),
        FileHasher::new(config.hash_algorithm),
        journal,
        Arc::new(DelimitedParser::<Member>::default()),
        Arc::new(sink.clone()),
        policy,
    )
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the journal migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
