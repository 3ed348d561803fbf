//! Short-lived side cache with fixed per-category TTLs.
//!
//! Entries are stored as `{"data": ..., "expires": <ms epoch>}` under
//! `simple_cache_{category}` or `simple_cache_{category}_{userId}`. Expired or
//! unreadable entries are removed on read and reported as a miss.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::KeyValueStore;
use crate::{Error, now_ms};

/// Key prefix shared by every side cache entry.
pub const TTL_CACHE_PREFIX: &str = "simple_cache_";

/// Data categories and their fixed lifetimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlCategory {
    Profile,
    GridItems,
    BacklogItems,
    FeedItems,
    DirectoryUsers,
}

impl TtlCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtlCategory::Profile => "profile",
            TtlCategory::GridItems => "grid_items",
            TtlCategory::BacklogItems => "backlog_items",
            TtlCategory::FeedItems => "feed_items",
            TtlCategory::DirectoryUsers => "directory_users",
        }
    }

    pub fn ttl(&self) -> Duration {
        let minutes = match self {
            TtlCategory::Profile => 15,
            TtlCategory::GridItems | TtlCategory::BacklogItems => 3,
            TtlCategory::FeedItems => 8,
            TtlCategory::DirectoryUsers => 10,
        };
        Duration::from_secs(minutes * 60)
    }
}

#[derive(Serialize, Deserialize)]
struct TtlEntry<T> {
    data: T,
    expires: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TtlCacheStats {
    pub total_entries: usize,
}

/// TTL cache over a [`KeyValueStore`].
#[derive(Clone)]
pub struct TtlCache {
    storage: Arc<dyn KeyValueStore>,
}

impl TtlCache {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self { storage }
    }

    pub fn key(category: TtlCategory, user_id: Option<&str>) -> String {
        match user_id {
            Some(user_id) => format!("{TTL_CACHE_PREFIX}{}_{user_id}", category.as_str()),
            None => format!("{TTL_CACHE_PREFIX}{}", category.as_str()),
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self, category: TtlCategory, user_id: Option<&str>,
    ) -> Result<Option<T>, Error> {
        let key = Self::key(category, user_id);
        let Some(raw) = self.storage.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<TtlEntry<T>>(&raw) {
            Ok(entry) if now_ms() <= entry.expires => {
                tracing::debug!(key, "side cache hit");
                Ok(Some(entry.data))
            }
            Ok(_) => {
                self.storage.remove(&key).await?;
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "side cache entry unreadable, removing");
                self.storage.remove(&key).await?;
                Ok(None)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, category: TtlCategory, data: &T, user_id: Option<&str>) -> Result<(), Error> {
        let key = Self::key(category, user_id);
        let ttl_ms = i64::try_from(category.ttl().as_millis()).unwrap_or(i64::MAX);
        let entry = TtlEntry { data, expires: now_ms().saturating_add(ttl_ms) };
        self.storage.set(&key, &serde_json::to_string(&entry)?).await?;
        tracing::debug!(key, "side cache set");
        Ok(())
    }

    /// Remove every entry scoped to `user_id`. Returns the number removed.
    pub async fn clear_user(&self, user_id: &str) -> Result<usize, Error> {
        let suffix = format!("_{user_id}");
        let doomed: Vec<String> = self
            .storage
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|key| key.starts_with(TTL_CACHE_PREFIX) && key.ends_with(&suffix))
            .collect();
        if !doomed.is_empty() {
            self.storage.multi_remove(&doomed).await?;
        }
        tracing::debug!(user_id, removed = doomed.len(), "side cache cleared for user");
        Ok(doomed.len())
    }

    pub async fn stats(&self) -> Result<TtlCacheStats, Error> {
        let total_entries = self
            .storage
            .get_all_keys()
            .await?
            .iter()
            .filter(|key| key.starts_with(TTL_CACHE_PREFIX))
            .count();
        Ok(TtlCacheStats { total_entries })
    }
}
