//! Storage trait definitions

use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent string key/value store backing the cache.
///
/// The cache layers its own namespacing, expiry and eviction on top, so
/// backends only need the four primitive operations. Implementations must be
/// thread-safe (Send + Sync); the coordinator is the only writer, but
/// respawned coordinator instances share the same store.
pub trait KeyValueStore: Send + Sync {
    /// Every stored entry, in no particular order
    fn get_all(&self) -> StorageResult<Vec<(String, String)>>;

    /// Load a single value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Insert or replace a value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a value, returning whether it existed
    fn remove(&self, key: &str) -> StorageResult<bool>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: KeyValueStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
