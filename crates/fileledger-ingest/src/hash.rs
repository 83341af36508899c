//! Content hashing for candidate files

use chrono::{DateTime, Utc};
use fileledger_common::checksum::{ContentHasher, HASH_BUFFER_SIZE};
use fileledger_common::HashAlgorithm;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::Result;
use crate::types::FileHash;

/// Streams a file through the configured digest
#[derive(Debug, Clone, Copy, Default)]
pub struct FileHasher {
    algorithm: HashAlgorithm,
}

impl FileHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hash the file at `path`. Identical bytes always give the same digest.
    pub async fn compute(&self, path: &Path) -> Result<FileHash> {
        let mut file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;

        let mut hasher = ContentHasher::new(self.algorithm);
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        let hash = hasher.finalize_hex();

        debug!(path = %path.display(), hash = %hash, algorithm = %self.algorithm, "Hashed file");

        Ok(FileHash {
            path: path.to_path_buf(),
            hash,
            byte_length: metadata.len(),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }
}
