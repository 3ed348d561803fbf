//! Core types and shared functionality for snapcache.
//!
//! This crate provides:
//! - Key/value storage backends (SQLite and in-memory)
//! - The versioned, chunked snapshot store
//! - The profile cache with its compact snapshot and TTL side cache
//! - Unified error types
//! - Configuration structures

pub mod config;
pub mod error;
pub mod model;
pub mod profile;
pub mod snapshot;
pub mod storage;
pub mod ttl_cache;

pub use config::AppConfig;
pub use error::Error;
pub use profile::{ProfileCache, ProfileWrite, WriteThroughOutcome};
pub use snapshot::{Envelope, PutOptions, PutOutcome, SnapshotKind, SnapshotStore, SweepReport};
pub use storage::{KeyValueStore, MemoryStorage, SqliteStorage};
pub use ttl_cache::{TtlCache, TtlCategory};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
