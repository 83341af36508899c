//! `fileledger hash` command implementation
//!
//! Prints digests in the `<hash>  <path>` layout of the `sha*sum` tools.

use fileledger_ingest::hash::FileHasher;
use fileledger_ingest::FileHash;
use std::path::PathBuf;

use super::{algorithm_or, import_config};
use crate::error::Result;

pub async fn run(files: &[PathBuf], algorithm: Option<&str>) -> Result<Vec<FileHash>> {
    let config = import_config(None)?;
    let hasher = FileHasher::new(algorithm_or(algorithm, config.hash_algorithm)?);

    let mut hashes = Vec::with_capacity(files.len());
    for path in files {
        let file = hasher.compute(path).await?;
        println!("{}  {}", file.hash, path.display());
        hashes.push(file);
    }
    Ok(hashes)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use fileledger_common::{checksum::compute_file_checksum, HashAlgorithm};

    #[tokio::test]
    async fn test_hash_matches_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "member_id,name\nM1,Ada\n").unwrap();

        let hashes = run(&[path.clone()], Some("sha256")).await.unwrap();
        assert_eq!(hashes[0].hash, compute_file_checksum(&path, HashAlgorithm::Sha256).unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(run(&[dir.path().join("absent.csv")], None).await.is_err());
    }
}
