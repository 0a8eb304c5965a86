//! In-memory storage backend

use super::traits::{KeyValueStore, OpenStore, StorageResult};
use dashmap::DashMap;
use std::path::Path;

/// Volatile key/value store.
///
/// Survives coordinator restarts as long as the owning `Arc` does, which is
/// enough for tests and for the CLI's one-shot runs without `--db`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all namespaces
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl OpenStore for MemoryStore {
    /// Paths are ignored; the store never touches disk.
    fn open(_path: impl AsRef<Path>) -> StorageResult<Self> {
        Ok(Self::new())
    }

    fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new())
    }
}

impl KeyValueStore for MemoryStore {
    fn get_all(&self) -> StorageResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.get(key).map(|r| r.value().clone()))
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}
