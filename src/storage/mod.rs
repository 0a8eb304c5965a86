//! Storage backends for the cache
//!
//! The cache talks to a `KeyValueStore`. `SqliteStore` persists to a file,
//! `MemoryStore` keeps everything in a `DashMap`.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{KeyValueStore, OpenStore, StorageError, StorageResult};
