#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use coachnet::app_dirs::CONFIG_HOME_ENV;
use coachnet::storage::{BlobStore, MemoryBlobStore, StorageError};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Points the application directory at `path` for the guard's lifetime.
pub struct ConfigHomeGuard {
    previous: Option<String>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl ConfigHomeGuard {
    pub fn set(path: PathBuf) -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let previous = std::env::var(CONFIG_HOME_ENV).ok();
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            std::env::set_var(CONFIG_HOME_ENV, path);
        }
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for ConfigHomeGuard {
    fn drop(&mut self) {
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            match self.previous.take() {
                Some(value) => std::env::set_var(CONFIG_HOME_ENV, value),
                None => std::env::remove_var(CONFIG_HOME_ENV),
            }
        }
    }
}

/// In-memory store whose writes to keys with a given prefix can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: MemoryBlobStore,
    pub fail_prefix: Option<String>,
    pub failed_writes: usize,
}

impl FlakyStore {
    pub fn failing(prefix: &str) -> Self {
        Self {
            fail_prefix: Some(prefix.to_string()),
            ..Self::default()
        }
    }
}

impl BlobStore for FlakyStore {
    fn save(&mut self, key: &str, blob: &[u8]) -> Result<(), StorageError> {
        if self
            .fail_prefix
            .as_deref()
            .is_some_and(|prefix| key.starts_with(prefix))
        {
            self.failed_writes += 1;
            return Err(StorageError::Unavailable(format!("refusing to write {key}")));
        }
        self.inner.save(key, blob)
    }

    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.load(key)
    }

    fn remove(&mut self, key: &str) -> Result<bool, StorageError> {
        self.inner.remove(key)
    }
}
