use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use super::{BlobStore, StorageError};

/// Default filename of the blob database inside the application directory.
pub const BLOB_DB_FILE_NAME: &str = "coachnet.db";

/// SQLite-backed blob store with one row per key.
pub struct SqliteBlobStore {
    connection: Connection,
    path: PathBuf,
}

impl SqliteBlobStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let connection = Connection::open(path).map_err(map_sql_error)?;
        let store = Self {
            connection,
            path: path.to_path_buf(),
        };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply_pragmas(&self) -> Result<(), StorageError> {
        self.connection
            .execute_batch(
                "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout=5000;",
            )
            .map_err(map_sql_error)
    }

    fn apply_schema(&self) -> Result<(), StorageError> {
        self.connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS blobs (
                    key TEXT PRIMARY KEY,
                    value BLOB NOT NULL,
                    updated_at INTEGER NOT NULL
                ) WITHOUT ROWID;",
            )
            .map_err(map_sql_error)
    }
}

impl BlobStore for SqliteBlobStore {
    fn save(&mut self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        self.connection
            .execute(
                "INSERT INTO blobs (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                                updated_at = excluded.updated_at",
                params![key, blob, now_epoch_seconds()],
            )
            .map_err(map_sql_error)?;
        tracing::debug!(key, bytes = blob.len(), "Blob saved");
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.connection
            .query_row("SELECT value FROM blobs WHERE key = ?1", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()
            .map_err(map_sql_error)
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        let removed = self
            .connection
            .execute("DELETE FROM blobs WHERE key = ?1", params![key])
            .map_err(map_sql_error)?;
        Ok(removed > 0)
    }
}

fn map_sql_error(err: rusqlite::Error) -> StorageError {
    match err {
        rusqlite::Error::SqliteFailure(sql_err, _)
            if sql_err.code == rusqlite::ErrorCode::DatabaseBusy =>
        {
            StorageError::Busy
        }
        other => StorageError::Sql(other),
    }
}

fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blobs_persist_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join(BLOB_DB_FILE_NAME);
        {
            let mut store = SqliteBlobStore::open(&path).unwrap();
            store.save("model/color_recognition", &[1, 2, 3]).unwrap();
            store.save("model/color_recognition", &[4, 5]).unwrap();
        }
        let store = SqliteBlobStore::open(&path).unwrap();
        assert_eq!(
            store.load("model/color_recognition").unwrap(),
            Some(vec![4, 5])
        );
        assert_eq!(store.load("rawdata/color_recognition").unwrap(), None);
    }

    #[test]
    fn remove_reports_missing_keys() {
        let dir = tempdir().unwrap();
        let mut store = SqliteBlobStore::open(dir.path().join(BLOB_DB_FILE_NAME)).unwrap();
        store.save("rawdata/digit_recognition", b"[]").unwrap();
        assert!(store.remove("rawdata/digit_recognition").unwrap());
        assert!(!store.remove("rawdata/digit_recognition").unwrap());
    }
}
