//! Configuration management
//!
//! Every setting has a typed default and can be overridden from the
//! environment (a `.env` file is honoured). Command line flags are applied on
//! top by the host binary before [`ImportConfig::validate`] runs.

use fileledger_common::HashAlgorithm;
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{IngestError, Result};
use crate::persister::postgres::DEFAULT_CHUNK_SIZE;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/fileledger";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Import Configuration Constants
// ============================================================================

/// Default importer kind recorded in the journal.
pub const DEFAULT_IMPORTER_NAME: &str = "default";

/// Default number of files hashed concurrently.
pub const DEFAULT_HASH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS),
            min_connections: env_or("DATABASE_MIN_CONNECTIONS", DEFAULT_DATABASE_MIN_CONNECTIONS),
            connect_timeout_secs: env_or(
                "DATABASE_CONNECT_TIMEOUT",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            ),
            idle_timeout_secs: env_or("DATABASE_IDLE_TIMEOUT", DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(IngestError::config("Database URL cannot be empty"));
        }

        if self.max_connections == 0 {
            return Err(IngestError::config("Database max_connections must be greater than 0"));
        }

        if self.min_connections > self.max_connections {
            return Err(IngestError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }

    /// Open the connection pool
    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .acquire_timeout(Duration::from_secs(self.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .connect(&self.url)
            .await
            .map_err(IngestError::from_sink)?;

        info!(
            max_connections = self.max_connections,
            min_connections = self.min_connections,
            "Database connection pool created"
        );

        Ok(pool)
    }
}

/// Settings for one import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Directory scanned for candidate files
    pub root: PathBuf,
    pub recursive: bool,
    /// Retry events whose status could not be determined
    pub reprocess_unknowns: bool,
    /// Retry events that previously failed
    pub reprocess_failures: bool,
    pub hash_concurrency: usize,
    pub hash_algorithm: HashAlgorithm,
    pub derive_moment_from_name: bool,
    /// `continue` or `rethrow`
    pub on_error: String,
    /// Rows per insert statement
    pub batch_size: usize,
    pub importer_name: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            recursive: false,
            reprocess_unknowns: false,
            reprocess_failures: false,
            hash_concurrency: DEFAULT_HASH_CONCURRENCY,
            hash_algorithm: HashAlgorithm::default(),
            derive_moment_from_name: false,
            on_error: "continue".to_string(),
            batch_size: DEFAULT_CHUNK_SIZE,
            importer_name: DEFAULT_IMPORTER_NAME.to_string(),
        }
    }
}

impl ImportConfig {
    /// Load from `IMPORT_*` and `IMPORTER_NAME` environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let hash_algorithm = match std::env::var("IMPORT_HASH_ALGORITHM") {
            Ok(value) => HashAlgorithm::from_str(&value)?,
            Err(_) => defaults.hash_algorithm,
        };

        Ok(Self {
            root: std::env::var("IMPORT_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root),
            recursive: env_or("IMPORT_RECURSIVE", defaults.recursive),
            reprocess_unknowns: env_or("IMPORT_REPROCESS_UNKNOWNS", defaults.reprocess_unknowns),
            reprocess_failures: env_or("IMPORT_REPROCESS_FAILURES", defaults.reprocess_failures),
            hash_concurrency: env_or("IMPORT_HASH_CONCURRENCY", defaults.hash_concurrency),
            hash_algorithm,
            derive_moment_from_name: env_or(
                "IMPORT_DERIVE_MOMENT_FROM_NAME",
                defaults.derive_moment_from_name,
            ),
            on_error: std::env::var("IMPORT_ON_ERROR").unwrap_or(defaults.on_error),
            batch_size: env_or("IMPORT_BATCH_SIZE", defaults.batch_size),
            importer_name: std::env::var("IMPORTER_NAME").unwrap_or(defaults.importer_name),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.importer_name.trim().is_empty() {
            return Err(IngestError::config("Importer name cannot be empty"));
        }

        if self.importer_name.len() > 100 {
            return Err(IngestError::config("Importer name cannot exceed 100 characters"));
        }

        if self.hash_concurrency == 0 {
            return Err(IngestError::config("Hash concurrency must be greater than 0"));
        }

        if self.batch_size == 0 {
            return Err(IngestError::config("Batch size must be greater than 0"));
        }

        self.on_error.parse::<crate::policy::ExceptionPolicy>()?;

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
