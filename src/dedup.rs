//! Content hashing and duplicate detection.

use crate::db::{Database, Document};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

/// Hex-encoded SHA-256 of a file, read in chunks.
pub fn compute_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; CHUNK_SIZE];

    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        hasher.update(&chunk[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Uniqueness checks against the catalog.
#[derive(Clone)]
pub struct Deduplicator {
    db: Database,
}

impl Deduplicator {
    /// Create a deduplicator over a catalog.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Whether a document with this hash is already catalogued.
    pub fn is_duplicate(&self, hash: &str) -> Result<bool> {
        Ok(self.db.get_document_by_hash(hash)?.is_some())
    }

    /// The catalogued document sharing this hash, if any.
    pub fn existing(&self, hash: &str) -> Result<Option<Document>> {
        self.db.get_document_by_hash(hash)
    }
}
