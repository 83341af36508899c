//! Streaming checksum utilities
//!
//! [`ContentHasher`] is the incremental digest behind every content hash in the
//! journal. Digests are rendered as upper-case hex.

use crate::error::{LedgerError, Result};
use crate::types::HashAlgorithm;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::io::Read;
use std::path::Path;

/// Read buffer used when hashing a stream
pub const HASH_BUFFER_SIZE: usize = 8192;

/// Incremental digest state for one [`HashAlgorithm`]
pub enum ContentHasher {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
    Md5(md5::Context),
}

impl ContentHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => ContentHasher::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => ContentHasher::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => ContentHasher::Sha512(Sha512::new()),
            HashAlgorithm::Blake3 => ContentHasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Md5 => ContentHasher::Md5(md5::Context::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ContentHasher::Sha256(h) => h.update(data),
            ContentHasher::Sha384(h) => h.update(data),
            ContentHasher::Sha512(h) => h.update(data),
            ContentHasher::Blake3(h) => {
                h.update(data);
            },
            ContentHasher::Md5(h) => h.consume(data),
        }
    }

    /// Consume the hasher and return the upper-case hex digest
    pub fn finalize_hex(self) -> String {
        match self {
            ContentHasher::Sha256(h) => hex::encode_upper(h.finalize()),
            ContentHasher::Sha384(h) => hex::encode_upper(h.finalize()),
            ContentHasher::Sha512(h) => hex::encode_upper(h.finalize()),
            ContentHasher::Blake3(h) => hex::encode_upper(h.finalize().as_bytes()),
            ContentHasher::Md5(h) => hex::encode_upper(h.compute().0),
        }
    }
}

/// Compute checksum for a file
pub fn compute_file_checksum(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file, algorithm)
}

/// Compute checksum for any readable source
pub fn compute_checksum<R: Read>(reader: &mut R, algorithm: HashAlgorithm) -> Result<String> {
    let mut hasher = ContentHasher::new(algorithm);
    let mut buffer = [0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}

/// Verify checksum for a file, comparing hex case-insensitively
pub fn verify_file_checksum(
    path: impl AsRef<Path>,
    expected: &str,
    algorithm: HashAlgorithm,
) -> Result<bool> {
    let actual = compute_file_checksum(path, algorithm)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        Err(LedgerError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
