//! Versioned, chunked snapshot store.
//!
//! Snapshots are JSON envelopes persisted through a [`KeyValueStore`]. The
//! store owns the on-disk format:
//!
//! - Primary key `{prefix}:{version}:{logicalKey}` holds a tagged record, either
//!   the inline envelope or a chunk-set meta record
//! - Envelopes above the chunk threshold are split into `{primaryKey}#{index}`
//!   parts; chunks are written before the meta record
//! - Envelopes above the hard maximum are refused and any stale value evicted
//! - Reads validate format version, shape and age; anything invalid is evicted
//!   and reported as absent, never as an error
//!
//! Only storage backend failures surface as `Err`.

mod chunk;
pub mod descriptor;
pub mod envelope;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::storage::KeyValueStore;
use crate::{Error, now_ms};

pub use descriptor::{SnapshotDescriptor, SnapshotKind};
pub use envelope::Envelope;

use envelope::{Invalid, StoredRecord};

/// Namespace prefix shared by every snapshot key.
pub const SNAPSHOT_PREFIX: &str = "snapshot";

/// Format and size policy for a [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    pub prefix: String,
    pub version: u32,
    pub chunk_threshold_bytes: usize,
    pub max_bytes: usize,
    pub max_age_ms: i64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SnapshotConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            prefix: SNAPSHOT_PREFIX.to_string(),
            version: config.snapshot_version,
            chunk_threshold_bytes: config.chunk_threshold_bytes,
            max_bytes: config.max_snapshot_bytes,
            max_age_ms: config.max_snapshot_age_ms,
        }
    }
}

/// Optional envelope fields for [`SnapshotStore::put`].
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub etag: Option<String>,
    /// Envelope timestamp in epoch milliseconds. Defaults to now.
    pub timestamp: Option<i64>,
}

impl PutOptions {
    pub fn at(timestamp: i64) -> Self {
        Self { etag: None, timestamp: Some(timestamp) }
    }
}

/// What a [`SnapshotStore::put`] actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PutOutcome {
    /// Written as a single value.
    Inline { bytes: usize },
    /// Written as a meta record plus `chunks` parts.
    Chunked { bytes: usize, chunks: usize },
    /// Larger than the hard maximum; nothing written, stale value evicted.
    RejectedOversize { bytes: usize },
}

impl PutOutcome {
    pub fn is_persisted(&self) -> bool {
        !matches!(self, PutOutcome::RejectedOversize { .. })
    }
}

/// Result of a hygiene sweep over the snapshot namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SweepReport {
    /// Primary snapshot keys inspected.
    pub inspected: usize,
    /// Primary snapshot keys evicted as invalid.
    pub evicted: usize,
    /// Chunk keys removed because their primary record was gone.
    pub orphan_chunks: usize,
}

/// Storage footprint of the snapshot namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotStats {
    pub primaries: usize,
    pub chunks: usize,
    pub total_bytes: usize,
}

/// Where a primary record's envelope lives.
enum Located {
    Inline(Value),
    Chunked(usize),
}

/// Persistent envelope store over a primitive key/value backend.
pub struct SnapshotStore {
    storage: Arc<dyn KeyValueStore>,
    config: SnapshotConfig,
    migrated: AtomicBool,
}

impl SnapshotStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, config: SnapshotConfig) -> Self {
        Self { storage, config, migrated: AtomicBool::new(false) }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Namespaced descriptor for `kind` under this store's format version.
    pub fn descriptor(&self, kind: &SnapshotKind) -> SnapshotDescriptor {
        SnapshotDescriptor::new(&self.config.prefix, self.config.version, kind)
    }

    /// Read and validate a snapshot.
    ///
    /// Returns `Ok(None)` when the key is missing or the stored value is corrupt,
    /// expired, from another format version or of the wrong shape. Invalid
    /// values are evicted along with their chunks.
    pub async fn get<T: DeserializeOwned>(&self, descriptor: &SnapshotDescriptor) -> Result<Option<Envelope<T>>, Error> {
        let key = descriptor.storage_key();
        let Some(raw) = self.storage.get(key).await? else {
            return Ok(None);
        };

        let payload = match locate(&raw) {
            Ok(Located::Inline(value)) => Ok(value),
            Ok(Located::Chunked(count)) => self.reassemble(key, count).await?,
            Err(reason) => Err(reason),
        };

        Ok(self.accept(key, payload).await)
    }

    /// Read several snapshots with one batched primary read.
    ///
    /// Chunk sets are fetched with one batched read each. Invalid entries are
    /// evicted and omitted from the map.
    pub async fn get_many(&self, kinds: &[SnapshotKind]) -> Result<HashMap<SnapshotKind, Envelope<Value>>, Error> {
        let mut result = HashMap::new();
        if kinds.is_empty() {
            return Ok(result);
        }

        let keys: Vec<String> = kinds
            .iter()
            .map(|kind| self.descriptor(kind).storage_key().to_string())
            .collect();
        let pairs = self.storage.multi_get(&keys).await?;

        for (kind, (key, raw)) in kinds.iter().zip(pairs) {
            let Some(raw) = raw else {
                continue;
            };
            let payload = match locate(&raw) {
                Ok(Located::Inline(value)) => Ok(value),
                Ok(Located::Chunked(count)) => self.reassemble(&key, count).await?,
                Err(reason) => Err(reason),
            };
            if let Some(envelope) = self.accept(&key, payload).await {
                result.insert(kind.clone(), envelope);
            }
        }

        Ok(result)
    }

    /// Persist `data` under `descriptor`, replacing any previous value.
    pub async fn put<T: Serialize>(
        &self, descriptor: &SnapshotDescriptor, data: &T, options: PutOptions,
    ) -> Result<PutOutcome, Error> {
        let key = descriptor.storage_key();
        let envelope = Envelope {
            version: self.config.version,
            timestamp: options.timestamp.unwrap_or_else(now_ms),
            etag: options.etag,
            data,
        };
        let value = serde_json::to_value(&envelope)?;
        let serialized = serde_json::to_string(&value)?;
        let bytes = serialized.len();

        if bytes > self.config.max_bytes {
            self.evict(key).await?;
            tracing::warn!(key, bytes, max = self.config.max_bytes, "snapshot put skipped (oversize)");
            return Ok(PutOutcome::RejectedOversize { bytes });
        }

        let previous_chunks = self.chunk_count_at(key).await?;

        let outcome = if bytes <= self.config.chunk_threshold_bytes {
            let record = serde_json::to_string(&StoredRecord::Inline { envelope: value })?;
            self.storage.set(key, &record).await?;
            PutOutcome::Inline { bytes }
        } else {
            let parts = chunk::split(&serialized, self.config.chunk_threshold_bytes);
            let chunks = parts.len();
            let meta = serde_json::to_string(&StoredRecord::Chunked { chunk_count: chunks })?;

            let mut entries: Vec<(String, String)> = parts
                .iter()
                .enumerate()
                .map(|(index, part)| (chunk::chunk_key(key, index), (*part).to_string()))
                .collect();
            entries.push((key.to_string(), meta));
            self.storage.multi_set(&entries).await?;
            PutOutcome::Chunked { bytes, chunks }
        };

        let written = match outcome {
            PutOutcome::Chunked { chunks, .. } => chunks,
            _ => 0,
        };
        if let Some(previous) = previous_chunks
            && previous >= written
        {
            let stale: Vec<String> = (written..=previous).map(|index| chunk::chunk_key(key, index)).collect();
            self.storage.multi_remove(&stale).await?;
        }

        tracing::debug!(key, ?outcome, "snapshot stored");
        Ok(outcome)
    }

    /// Remove a snapshot and all of its chunks.
    pub async fn remove(&self, descriptor: &SnapshotDescriptor) -> Result<(), Error> {
        self.evict(descriptor.storage_key()).await
    }

    /// One-time startup hygiene sweep.
    ///
    /// The first call per store runs [`SnapshotStore::sweep`]; later calls
    /// return an empty report without touching storage.
    pub async fn migrate(&self) -> Result<SweepReport, Error> {
        if self.migrated.swap(true, Ordering::SeqCst) {
            return Ok(SweepReport::default());
        }
        let report = self.sweep().await?;
        tracing::info!(
            inspected = report.inspected,
            evicted = report.evicted,
            orphan_chunks = report.orphan_chunks,
            "snapshot migration complete"
        );
        Ok(report)
    }

    /// Validate every snapshot in the namespace and evict the invalid ones.
    ///
    /// Covers every format version, so entries orphaned by a version bump are
    /// reclaimed here. Chunk keys whose primary record is gone are removed too.
    pub async fn sweep(&self) -> Result<SweepReport, Error> {
        let mut report = SweepReport::default();
        let (primaries, chunks) = self.namespace_keys().await?;

        let mut evicted = HashSet::new();
        for key in &primaries {
            report.inspected += 1;
            let Some(raw) = self.storage.get(key).await? else {
                continue;
            };

            let payload = match locate(&raw) {
                Ok(Located::Inline(value)) => Ok(value),
                Ok(Located::Chunked(count)) => self.reassemble(key, count).await?,
                Err(reason) => Err(reason),
            };
            let verdict = payload.and_then(|value| {
                envelope::validate::<Value>(value, self.config.version, self.config.max_age_ms, now_ms())
            });

            if let Err(reason) = verdict {
                tracing::debug!(key, %reason, "sweep evicting snapshot");
                self.evict_logged(key).await;
                evicted.insert(key.as_str());
                report.evicted += 1;
            }
        }

        let live: HashSet<&str> = primaries
            .iter()
            .map(String::as_str)
            .filter(|key| !evicted.contains(key))
            .collect();
        let orphans: Vec<String> = chunks
            .into_iter()
            .filter(|key| chunk::parse_chunk_key(key).is_some_and(|(base, _)| !live.contains(base)))
            .collect();
        if !orphans.is_empty() {
            self.storage.multi_remove(&orphans).await?;
            report.orphan_chunks = orphans.len();
        }

        Ok(report)
    }

    /// Count keys and bytes held in the snapshot namespace.
    pub async fn stats(&self) -> Result<SnapshotStats, Error> {
        let (primaries, chunks) = self.namespace_keys().await?;
        let mut stats = SnapshotStats { primaries: primaries.len(), chunks: chunks.len(), total_bytes: 0 };

        let keys: Vec<String> = primaries.into_iter().chain(chunks).collect();
        if keys.is_empty() {
            return Ok(stats);
        }
        stats.total_bytes = self
            .storage
            .multi_get(&keys)
            .await?
            .into_iter()
            .filter_map(|(_, value)| value)
            .map(|value| value.len())
            .sum();
        Ok(stats)
    }

    /// Split the namespace's keys into primaries and chunk keys.
    async fn namespace_keys(&self) -> Result<(Vec<String>, Vec<String>), Error> {
        let namespace = format!("{}:", self.config.prefix);
        let keys = self.storage.get_all_keys().await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.starts_with(&namespace))
            .partition(|key| chunk::parse_chunk_key(key).is_none()))
    }

    /// Read a chunk set and join it back into the serialized envelope.
    ///
    /// The chunk after the last one is read as well, so a set with extra
    /// chunks is caught just like a set with missing ones.
    async fn reassemble(&self, key: &str, count: usize) -> Result<Result<Value, Invalid>, Error> {
        if count == 0 {
            return Ok(Err(Invalid::ChunkMismatch { expected: 0, found: 0 }));
        }

        let lookahead = chunk::chunk_range(key, count + 1);
        let pairs = self.storage.multi_get(&lookahead).await?;
        let found = pairs.iter().filter(|(_, value)| value.is_some()).count();
        let complete = pairs[..count].iter().all(|(_, value)| value.is_some()) && pairs[count].1.is_none();
        if !complete {
            return Ok(Err(Invalid::ChunkMismatch { expected: count, found }));
        }

        let joined: String = pairs.into_iter().filter_map(|(_, value)| value).collect();
        if joined.len() > self.config.max_bytes {
            return Ok(Err(Invalid::Oversize { bytes: joined.len(), max: self.config.max_bytes }));
        }
        Ok(serde_json::from_str(&joined).map_err(|e| Invalid::Corrupt(e.to_string())))
    }

    /// Validate a located payload; evict and return `None` when it is unusable.
    async fn accept<T: DeserializeOwned>(&self, key: &str, payload: Result<Value, Invalid>) -> Option<Envelope<T>> {
        let verdict = payload.and_then(|value| {
            envelope::validate(value, self.config.version, self.config.max_age_ms, now_ms())
        });
        match verdict {
            Ok(envelope) => Some(envelope),
            Err(reason) => {
                tracing::debug!(key, %reason, "evicting invalid snapshot");
                self.evict_logged(key).await;
                None
            }
        }
    }

    async fn chunk_count_at(&self, key: &str) -> Result<Option<usize>, Error> {
        let raw = self.storage.get(key).await?;
        Ok(raw.and_then(|raw| match locate(&raw) {
            Ok(Located::Chunked(count)) => Some(count),
            _ => None,
        }))
    }

    /// Remove the primary key first, then every chunk it may own.
    async fn evict(&self, key: &str) -> Result<(), Error> {
        let mut doomed = vec![key.to_string()];
        if let Some(count) = self.chunk_count_at(key).await? {
            doomed.extend(chunk::chunk_range(key, count + 1));
        }
        self.storage.multi_remove(&doomed).await
    }

    async fn evict_logged(&self, key: &str) {
        if let Err(e) = self.evict(key).await {
            tracing::warn!(key, error = %e, "snapshot eviction failed");
        }
    }
}

fn locate(raw: &str) -> Result<Located, Invalid> {
    match serde_json::from_str::<StoredRecord>(raw) {
        Ok(StoredRecord::Inline { envelope }) => Ok(Located::Inline(envelope)),
        Ok(StoredRecord::Chunked { chunk_count }) => Ok(Located::Chunked(chunk_count)),
        Err(e) => Err(Invalid::Corrupt(e.to_string())),
    }
}
