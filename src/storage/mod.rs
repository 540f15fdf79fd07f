//! Key/blob persistence for models and datasets.
//!
//! The trainer only needs `save(key, blob)` and `load(key)`. Keys look like
//! `model/<variant>` and `rawdata/<variant>`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

mod sqlite;

pub use sqlite::{BLOB_DB_FILE_NAME, SqliteBlobStore};

/// Errors returned by blob stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to create the directory for the database file.
    #[error("Could not create storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// SQLite query failed.
    #[error("Storage query failed: {0}")]
    Sql(#[from] rusqlite::Error),
    /// Database is locked by another process.
    #[error("Storage is busy, please retry")]
    Busy,
    /// The backing store refused the operation.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Opaque key/blob store.
pub trait BlobStore {
    /// Store `blob` under `key`, replacing any previous value.
    fn save(&mut self, key: &str, blob: &[u8]) -> Result<(), StorageError>;

    /// Fetch the blob stored under `key`. A missing key is `Ok(None)`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Delete the blob under `key`, returning whether it existed.
    fn remove(&mut self, key: &str) -> Result<bool, StorageError>;
}

impl<S: BlobStore + ?Sized> BlobStore for Box<S> {
    fn save(&mut self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        (**self).save(key, blob)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).load(key)
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        (**self).remove(key)
    }
}

/// In-process store; contents vanish with the value.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: BTreeMap<String, Vec<u8>>,
    writes: usize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blobs.keys().map(String::as_str)
    }
}

impl BlobStore for MemoryBlobStore {
    fn save(&mut self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        self.blobs.insert(key.to_string(), blob.to_vec());
        self.writes += 1;
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.get(key).cloned())
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        Ok(self.blobs.remove(key).is_some())
    }
}
