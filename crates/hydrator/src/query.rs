//! Reactive query cache seam.
//!
//! Queries are addressed by hierarchical keys such as
//! `["messaging", "conversations", "u1"]`. Invalidation and removal match by
//! key prefix, so `["messaging"]` covers every messaging query.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

pub type QueryKey = Vec<String>;

/// Replaces a query's data in place. Returning `None` leaves it untouched.
pub type QueryUpdater = Box<dyn FnOnce(&Value) -> Option<Value> + Send>;

/// Stable hierarchical keys shared by hydration jobs and screens.
pub mod query_keys {
    use super::QueryKey;

    fn key<const N: usize>(parts: [&str; N]) -> QueryKey {
        parts.iter().map(|part| (*part).to_string()).collect()
    }

    pub fn directory_all() -> QueryKey {
        key(["directory"])
    }

    pub fn profile_detail(user_name: &str) -> QueryKey {
        key(["profile", "detail", user_name])
    }

    pub fn profile_header(user_name: &str) -> QueryKey {
        key(["profile", "header", user_name])
    }

    pub fn want_to_meet_all() -> QueryKey {
        key(["wantToMeet"])
    }

    pub fn want_to_meet_list(user_id: &str) -> QueryKey {
        key(["wantToMeet", user_id])
    }

    pub fn messaging_root() -> QueryKey {
        key(["messaging"])
    }

    pub fn conversations(user_id: &str) -> QueryKey {
        key(["messaging", "conversations", user_id])
    }
}

/// Paged query data as held by infinite queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfinitePages<T> {
    pub pages: Vec<T>,
    pub page_params: Vec<u32>,
}

impl<T> InfinitePages<T> {
    pub fn first(page: T) -> Self {
        Self { pages: vec![page], page_params: vec![1] }
    }
}

/// Bookkeeping kept next to a query's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryState {
    /// Epoch milliseconds of the last data write.
    pub data_updated_at: i64,
    pub is_invalidated: bool,
}

#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn get_query_data(&self, key: &[String]) -> Option<Value>;

    async fn set_query_data(&self, key: &[String], data: Value, updated_at: i64);

    /// Apply `updater` to existing data under the cache's own lock.
    ///
    /// The query's freshness is left as it was: a partial splice does not
    /// make a stale list fresh.
    async fn update_query_data(&self, key: &[String], updater: QueryUpdater) -> bool;

    async fn get_query_state(&self, key: &[String]) -> Option<QueryState>;

    /// Mark every query under `prefix` stale so the next read refetches.
    async fn invalidate_queries(&self, prefix: &[String]);

    /// Drop every query under `prefix`.
    async fn remove_queries(&self, prefix: &[String]);
}

#[derive(Debug, Clone)]
struct QueryEntry {
    data: Value,
    state: QueryState,
}

/// Process-local query cache.
#[derive(Debug, Default)]
pub struct MemoryQueryClient {
    entries: RwLock<HashMap<QueryKey, QueryEntry>>,
}

impl MemoryQueryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn under(key: &[String], prefix: &[String]) -> bool {
    key.starts_with(prefix)
}

#[async_trait]
impl QueryClient for MemoryQueryClient {
    async fn get_query_data(&self, key: &[String]) -> Option<Value> {
        self.entries.read().await.get(key).map(|entry| entry.data.clone())
    }

    async fn set_query_data(&self, key: &[String], data: Value, updated_at: i64) {
        let state = QueryState { data_updated_at: updated_at, is_invalidated: false };
        self.entries.write().await.insert(key.to_vec(), QueryEntry { data, state });
    }

    async fn update_query_data(&self, key: &[String], updater: QueryUpdater) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        match updater(&entry.data) {
            Some(data) => {
                entry.data = data;
                true
            }
            None => false,
        }
    }

    async fn get_query_state(&self, key: &[String]) -> Option<QueryState> {
        self.entries.read().await.get(key).map(|entry| entry.state)
    }

    async fn invalidate_queries(&self, prefix: &[String]) {
        let mut entries = self.entries.write().await;
        for (key, entry) in entries.iter_mut() {
            if under(key, prefix) {
                entry.state.is_invalidated = true;
            }
        }
        tracing::debug!(?prefix, "queries invalidated");
    }

    async fn remove_queries(&self, prefix: &[String]) {
        self.entries.write().await.retain(|key, _| !under(key, prefix));
        tracing::debug!(?prefix, "queries removed");
    }
}
