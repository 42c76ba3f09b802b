//! Durable string-keyed storage primitives the cache writes through

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use async_trait::async_trait;
use parking_lot::RwLock;
use picstore::RecordStore;

/// Error raised by a storage backend
#[derive(Debug)]
pub enum StorageError {
    /// Record store failure
    Store(picstore::Error),

    /// Stored bytes are not valid UTF-8
    Encoding(String),

    /// Blocking storage task panicked or was cancelled
    Task(String),

    /// Backend refused the operation
    Unavailable(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Store(e) => write!(f, "Store error: {}", e),
            StorageError::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            StorageError::Task(msg) => write!(f, "Storage task failed: {}", msg),
            StorageError::Unavailable(msg) => write!(f, "Storage unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<picstore::Error> for StorageError {
    fn from(err: picstore::Error) -> Self {
        StorageError::Store(err)
    }
}

/// Async string-keyed get/set that survives restarts
#[async_trait]
pub trait KvStorage: Send + Sync {
    /// Read the value stored under `key`
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value stored under `key`
    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError>;
}

#[async_trait]
impl<S: KvStorage + ?Sized> KvStorage for Arc<S> {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get_item(key).await
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        (**self).set_item(key, value).await
    }
}

/// In-memory storage, with switches to make reads or writes fail
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String, RandomState>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent read fail (or succeed again)
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make every subsequent write fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Raw stored text for a key
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    /// Store raw text, bypassing the failure switches
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.items.write().insert(key.to_string(), value.to_string());
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Check if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl KvStorage for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("reads disabled".to_string()));
        }
        Ok(self.items.read().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        self.items.write().insert(key.to_string(), value);
        Ok(())
    }
}

/// Storage backed by an on-disk [`RecordStore`]
#[derive(Clone)]
pub struct FileStorage {
    store: Arc<RecordStore>,
}

impl FileStorage {
    /// Open (or create) a record store in `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Ok(Self::from_store(Arc::new(RecordStore::open(path)?)))
    }

    /// Wrap an already opened store
    pub fn from_store(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    /// The underlying record store
    pub fn store(&self) -> &RecordStore {
        &self.store
    }
}

#[async_trait]
impl KvStorage for FileStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();

        let bytes = tokio::task::spawn_blocking(move || store.get(&key))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        bytes
            .map(String::from_utf8)
            .transpose()
            .map_err(|e| StorageError::Encoding(e.to_string()))
    }

    async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
        let store = Arc::clone(&self.store);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || store.put(&key, value.as_bytes()))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        Ok(())
    }
}
