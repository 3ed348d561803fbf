//! Primitive string key/value storage.
//!
//! Everything above this layer owns its own serialization; backends only ever
//! see opaque string keys and values. Two backends are provided:
//!
//! - [`SqliteStorage`]: persistent, WAL-mode SQLite via tokio-rusqlite
//! - [`MemoryStorage`]: process-local map, used by tests and ephemeral hosts

pub mod memory;
pub mod migrations;
pub mod sqlite;

use async_trait::async_trait;

use crate::Error;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Async string key/value store.
///
/// `multi_*` operations are single round trips. `multi_set` must apply all pairs
/// or none where the backend can guarantee it.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Read several keys at once. Results are returned in request order.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<String>)>, Error>;

    async fn multi_set(&self, pairs: &[(String, String)]) -> Result<(), Error>;

    async fn remove(&self, key: &str) -> Result<(), Error>;

    async fn multi_remove(&self, keys: &[String]) -> Result<(), Error>;

    async fn get_all_keys(&self) -> Result<Vec<String>, Error>;
}
