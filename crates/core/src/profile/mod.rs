//! In-memory profile cache with write-through persistence.
//!
//! Entries are keyed by user id; a handle index resolves user names to ids.
//! Every accepted write records its timestamp, and writes older than the last
//! recorded one are skipped, so concurrent writers resolve last-write-wins.
//! Persistence for one id is serialized, and a write that a newer accepted
//! write overtakes before reaching disk is not persisted at all.

pub mod compact;

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::AppConfig;
use crate::model::{Item, Profile, ProfileData};
use crate::snapshot::{PutOptions, PutOutcome, SnapshotKind, SnapshotStore};
use crate::storage::KeyValueStore;
use crate::ttl_cache::{TtlCache, TtlCategory};
use crate::{Error, now_ms};

pub use compact::{CompactStore, CompactWrite};

/// User ids that stand in for "nobody" and are never cached.
pub const PLACEHOLDER_IDS: [&str; 4] = ["", "guest", "undefined", "null"];

pub fn is_placeholder_id(id: &str) -> bool {
    PLACEHOLDER_IDS.contains(&id.trim())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCacheEntry {
    #[serde(flatten)]
    pub data: ProfileData,
    pub timestamp: i64,
}

/// A full profile write.
#[derive(Debug, Clone)]
pub struct ProfileWrite {
    pub id: String,
    pub handle: Option<String>,
    pub data: ProfileData,
    /// Defaults to now.
    pub updated_at: Option<i64>,
}

/// Which item list a partial write replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemList {
    Grid,
    Backlog,
}

/// A write of one item list, keeping the rest of the cached entry.
#[derive(Debug, Clone)]
pub struct ItemsWrite {
    pub id: String,
    pub handle: Option<String>,
    pub list: ItemList,
    pub items: Vec<Item>,
    /// Replaces the cached profile when present.
    pub profile: Option<Profile>,
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    PlaceholderId,
    MissingUserName,
    /// A partial write arrived with no profile and none was cached.
    MissingProfile,
}

/// Result of each persistence target of an accepted write.
///
/// `None` means the target failed; the failure has already been logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PersistReport {
    pub snapshot: Option<PutOutcome>,
    pub compact: Option<CompactWrite>,
    pub side_cache: bool,
    /// A newer write for the same id was accepted first; nothing was written.
    pub superseded: bool,
}

impl PersistReport {
    fn superseded() -> Self {
        Self { superseded: true, ..Self::default() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WriteThroughOutcome {
    Accepted { timestamp: i64, report: PersistReport },
    SkippedStale { incoming: i64, current: i64 },
    Rejected { reason: RejectReason },
}

#[derive(Default)]
struct Maps {
    by_id: HashMap<String, ProfileCacheEntry>,
    by_handle: HashMap<String, String>,
    snapshot_times: HashMap<String, i64>,
    /// Accepted full writes per id, used to drop overtaken persists.
    generations: HashMap<String, u64>,
}

impl Maps {
    fn link(&mut self, id: &str, handle: Option<&str>) {
        if let Some(handle) = handle.filter(|handle| !handle.is_empty()) {
            self.by_handle.insert(handle.to_string(), id.to_string());
        }
    }

    fn upsert(&mut self, id: &str, handle: Option<&str>, data: ProfileData, timestamp: i64) -> ProfileCacheEntry {
        self.link(id, handle);
        let entry = ProfileCacheEntry { data, timestamp };
        self.by_id.insert(id.to_string(), entry.clone());
        self.snapshot_times.insert(id.to_string(), timestamp);
        entry
    }

    fn bump(&mut self, id: &str) -> u64 {
        let generation = self.generations.entry(id.to_string()).or_default();
        *generation += 1;
        *generation
    }

    fn remove(&mut self, id: &str) -> Option<ProfileCacheEntry> {
        self.by_handle.retain(|_, linked| linked != id);
        self.snapshot_times.remove(id);
        self.generations.remove(id);
        self.by_id.remove(id)
    }
}

/// Shared profile cache. Construct once and share by `Arc`.
pub struct ProfileCache {
    maps: RwLock<Maps>,
    snapshots: Arc<SnapshotStore>,
    compact: CompactStore,
    side_cache: TtlCache,
    persisting: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProfileCache {
    pub fn new(snapshots: Arc<SnapshotStore>, compact: CompactStore, side_cache: TtlCache) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            snapshots,
            compact,
            side_cache,
            persisting: Mutex::new(HashMap::new()),
        }
    }

    /// Build a cache whose compact and side-cache layers share `storage`.
    pub fn with_storage(storage: Arc<dyn KeyValueStore>, snapshots: Arc<SnapshotStore>, config: &AppConfig) -> Self {
        let compact = CompactStore::new(storage.clone(), &config.cache_epoch, config.compact_max_bytes);
        Self::new(snapshots, compact, TtlCache::new(storage))
    }

    pub async fn get_by_id(&self, id: &str) -> Option<ProfileCacheEntry> {
        self.maps.read().await.by_id.get(id).cloned()
    }

    pub async fn get_by_handle(&self, handle: &str) -> Option<ProfileCacheEntry> {
        let maps = self.maps.read().await;
        let id = maps.by_handle.get(handle)?;
        maps.by_id.get(id).cloned()
    }

    pub async fn snapshot_by_handle(&self, handle: &str) -> Option<ProfileData> {
        self.get_by_handle(handle).await.map(|entry| entry.data)
    }

    pub async fn link_handle(&self, handle: &str, id: &str) {
        self.maps.write().await.link(id, Some(handle));
    }

    /// Timestamp of the last accepted write for `id`.
    pub async fn last_snapshot_time(&self, id: &str) -> Option<i64> {
        self.maps.read().await.snapshot_times.get(id).copied()
    }

    pub async fn upsert(
        &self, id: &str, handle: Option<&str>, data: ProfileData, timestamp: Option<i64>,
    ) -> ProfileCacheEntry {
        let timestamp = timestamp.unwrap_or_else(now_ms);
        self.maps.write().await.upsert(id, handle, data, timestamp)
    }

    /// Replace an entry with the updater's result, or delete it on `None`.
    pub async fn update<F>(&self, id: &str, handle: Option<&str>, updater: F) -> Option<ProfileCacheEntry>
    where
        F: FnOnce(Option<&ProfileCacheEntry>) -> Option<ProfileData>,
    {
        let mut maps = self.maps.write().await;
        maps.link(id, handle);
        let next = updater(maps.by_id.get(id));
        match next {
            Some(data) => Some(maps.upsert(id, handle, data, now_ms())),
            None => {
                maps.remove(id);
                None
            }
        }
    }

    /// Accept a full profile write into memory and persist it.
    ///
    /// Placeholder ids and profiles without a user name are rejected, and
    /// writes older than the last accepted one are skipped. Neither is an error.
    pub async fn write_through(&self, write: ProfileWrite) -> WriteThroughOutcome {
        let ProfileWrite { id, handle, data, updated_at } = write;
        if is_placeholder_id(&id) {
            tracing::warn!(id, "profile write rejected: placeholder id");
            return WriteThroughOutcome::Rejected { reason: RejectReason::PlaceholderId };
        }
        let handle = handle
            .filter(|handle| !handle.is_empty())
            .or_else(|| Some(data.profile.user_name.clone()).filter(|name| !name.is_empty()));
        let Some(handle) = handle else {
            tracing::warn!(id, "profile write rejected: missing user name");
            return WriteThroughOutcome::Rejected { reason: RejectReason::MissingUserName };
        };

        let timestamp = updated_at.unwrap_or_else(now_ms);
        let generation = {
            let mut maps = self.maps.write().await;
            if let Some(&current) = maps.snapshot_times.get(&id)
                && timestamp < current
            {
                tracing::debug!(id, incoming = timestamp, current, "profile write skipped: stale");
                return WriteThroughOutcome::SkippedStale { incoming: timestamp, current };
            }
            maps.upsert(&id, Some(handle.as_str()), data.clone(), timestamp);
            maps.bump(&id)
        };

        let lock = self.persist_lock(&id).await;
        let _held = lock.lock().await;
        let latest = self.maps.read().await.generations.get(&id).copied();
        let report = if latest == Some(generation) {
            self.persist(&id, &handle, &data, timestamp).await
        } else {
            tracing::debug!(id, timestamp, "profile persist skipped: superseded");
            PersistReport::superseded()
        };
        WriteThroughOutcome::Accepted { timestamp, report }
    }

    /// Replace only the grid or only the backlog of a profile.
    pub async fn write_items(&self, write: ItemsWrite) -> WriteThroughOutcome {
        let existing = self.get_by_id(&write.id).await;
        let Some(profile) = write
            .profile
            .or_else(|| existing.as_ref().map(|entry| entry.data.profile.clone()))
        else {
            tracing::warn!(id = %write.id, "item write rejected: no profile to attach to");
            return WriteThroughOutcome::Rejected { reason: RejectReason::MissingProfile };
        };

        let kept = |list: ItemList| {
            existing
                .as_ref()
                .map(|entry| match list {
                    ItemList::Grid => entry.data.grid_items.clone(),
                    ItemList::Backlog => entry.data.backlog_items.clone(),
                })
                .unwrap_or_default()
        };
        let data = match write.list {
            ItemList::Grid => ProfileData { profile, grid_items: write.items, backlog_items: kept(ItemList::Backlog) },
            ItemList::Backlog => ProfileData { profile, grid_items: kept(ItemList::Grid), backlog_items: write.items },
        };

        self.write_through(ProfileWrite { id: write.id, handle: write.handle, data, updated_at: write.updated_at })
            .await
    }

    /// Seed the cache from the compact on-disk snapshot.
    ///
    /// Returns `None` when there is no usable snapshot. A newer in-memory
    /// entry is kept and returned instead of the disk copy.
    pub async fn load_from_disk(&self, id: &str, handle: Option<&str>) -> Option<ProfileData> {
        let snapshot = match self.compact.read(id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(id, error = %e, "compact profile snapshot read failed");
                return None;
            }
        };
        let data = snapshot.to_profile_data()?;
        let handle = handle.map(str::to_string).or(snapshot.user_name.clone());

        let mut maps = self.maps.write().await;
        if let Some(entry) = maps.by_id.get(id)
            && entry.timestamp > snapshot.updated_at
        {
            return Some(entry.data.clone());
        }
        maps.upsert(id, handle.as_deref(), data.clone(), snapshot.updated_at);
        Some(data)
    }

    /// Remove one user from memory and from the compact and side-cache
    /// layers. The snapshot store keeps its copy.
    pub async fn forget(&self, id: &str) -> Result<(), Error> {
        self.maps.write().await.remove(id);
        let lock = self.persist_lock(id).await;
        let _held = lock.lock().await;
        self.compact.clear(id).await?;
        let removed = self.side_cache.clear_user(id).await?;
        self.persisting.lock().await.remove(id);
        tracing::debug!(id, side_entries = removed, "profile forgotten");
        Ok(())
    }

    /// Drop every in-memory entry and index.
    pub async fn clear(&self) {
        let mut maps = self.maps.write().await;
        *maps = Maps::default();
        tracing::debug!("profile cache cleared");
    }

    async fn persist_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.persisting.lock().await.entry(id.to_string()).or_default().clone()
    }

    async fn persist(&self, id: &str, handle: &str, data: &ProfileData, timestamp: i64) -> PersistReport {
        let descriptor = self.snapshots.descriptor(&SnapshotKind::Profile(id.to_string()));
        let snapshot = self.snapshots.put(&descriptor, data, PutOptions::at(timestamp));
        let compact = self.compact.write(id, Some(handle), data, Some(timestamp));
        let side_cache = self.write_side_cache(id, data);

        let (snapshot, compact, side_cache) = futures_util::join!(snapshot, compact, side_cache);

        PersistReport {
            snapshot: logged(id, "snapshot", snapshot),
            compact: logged(id, "compact snapshot", compact),
            side_cache: logged(id, "side cache", side_cache).is_some(),
            superseded: false,
        }
    }

    async fn write_side_cache(&self, id: &str, data: &ProfileData) -> Result<(), Error> {
        let grid: Vec<compact::CompactItem> = data.grid_items.iter().map(Into::into).collect();
        let backlog: Vec<compact::CompactItem> = data.backlog_items.iter().map(Into::into).collect();
        let (grid, backlog) = futures_util::join!(
            self.side_cache.set(TtlCategory::GridItems, &grid, Some(id)),
            self.side_cache.set(TtlCategory::BacklogItems, &backlog, Some(id)),
        );
        grid.and(backlog)
    }
}

fn logged<T>(id: &str, target: &str, result: Result<T, Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(id, target, error = %e, "profile persistence failed");
            None
        }
    }
}
