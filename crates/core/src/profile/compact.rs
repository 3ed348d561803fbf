//! Slim on-disk profile format used for fast cold starts.
//!
//! Keyed `compact_profile_snapshot_v{epoch}:{version}:{userId}`. Only the
//! fields needed to render a profile screen are kept, and writes larger than
//! the configured limit are skipped rather than truncated.

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::model::{Item, Profile, ProfileData};
use crate::storage::KeyValueStore;
use crate::{Error, now_ms};

/// Current compact format version. Reads of any other version are misses.
pub const COMPACT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, rename = "avatar_url", skip_serializing_if = "String::is_empty")]
    pub avatar_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub updated: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactItem {
    pub id: String,
    #[serde(rename = "ref")]
    pub ref_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub list: bool,
    #[serde(default)]
    pub backlog: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub prompt_context: String,
    /// Last item update in epoch milliseconds.
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactProfileSnapshot {
    pub version: u32,
    pub updated_at: i64,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<CompactProfile>,
    #[serde(default)]
    pub grid: Vec<CompactItem>,
    #[serde(default)]
    pub backlog: Vec<CompactItem>,
}

/// What [`CompactStore::write`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CompactWrite {
    Saved { bytes: usize },
    SkippedOversize { bytes: usize },
}

impl From<&Profile> for CompactProfile {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            user_name: profile.user_name.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            name: profile.name.clone(),
            location: profile.location.clone(),
            image: profile.image.clone(),
            avatar_url: profile.avatar_url.clone(),
            updated: profile.updated.clone(),
        }
    }
}

impl CompactProfile {
    fn into_profile(self) -> Profile {
        Profile {
            id: self.id,
            user_name: self.user_name,
            first_name: self.first_name,
            last_name: self.last_name,
            name: self.name,
            location: self.location,
            image: self.image,
            avatar_url: self.avatar_url,
            updated: if self.updated.is_empty() { format_ms(now_ms()) } else { self.updated },
        }
    }
}

impl From<&Item> for CompactItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            ref_id: item.ref_id.clone(),
            title: if item.title.is_empty() { item.text.clone() } else { item.title.clone() },
            image: item.image.clone(),
            url: item.url.clone(),
            text: item.text.clone(),
            list: item.list,
            backlog: item.backlog,
            order: item.order,
            prompt_context: item.prompt_context.clone(),
            updated_at: parse_timestamp_ms(&item.updated).unwrap_or_else(now_ms),
        }
    }
}

impl CompactItem {
    fn to_item(&self) -> Item {
        let stamp = format_ms(self.updated_at);
        Item {
            id: self.id.clone(),
            ref_id: self.ref_id.clone(),
            title: self.title.clone(),
            image: self.image.clone(),
            url: self.url.clone(),
            text: self.text.clone(),
            list: self.list,
            backlog: self.backlog,
            order: self.order,
            prompt_context: self.prompt_context.clone(),
            created: stamp.clone(),
            updated: stamp,
        }
    }
}

impl CompactProfileSnapshot {
    /// Rebuild full profile data. `None` when no user name can be recovered.
    pub fn to_profile_data(&self) -> Option<ProfileData> {
        let mut profile = match &self.profile {
            Some(compact) => compact.clone().into_profile(),
            None => Profile {
                id: self.user_id.clone(),
                user_name: self.user_name.clone().unwrap_or_default(),
                updated: format_ms(self.updated_at),
                ..Default::default()
            },
        };
        if profile.user_name.is_empty() {
            profile.user_name = self.user_name.clone().unwrap_or_default();
        }
        if profile.user_name.is_empty() {
            return None;
        }
        Some(ProfileData {
            profile,
            grid_items: self.grid.iter().map(CompactItem::to_item).collect(),
            backlog_items: self.backlog.iter().map(CompactItem::to_item).collect(),
        })
    }
}

/// Reader and writer for compact profile snapshots.
#[derive(Clone)]
pub struct CompactStore {
    storage: Arc<dyn KeyValueStore>,
    prefix: String,
    max_bytes: usize,
}

impl CompactStore {
    pub fn new(storage: Arc<dyn KeyValueStore>, epoch: &str, max_bytes: usize) -> Self {
        Self { storage, prefix: format!("compact_profile_snapshot_v{epoch}"), max_bytes }
    }

    pub fn key(&self, user_id: &str) -> String {
        format!("{}:{COMPACT_VERSION}:{user_id}", self.prefix)
    }

    /// Write a compact snapshot of `data` for `user_id`.
    ///
    /// Without an explicit `updated_at`, the snapshot is stamped with the later
    /// of now and the newest item update.
    pub async fn write(
        &self, user_id: &str, user_name: Option<&str>, data: &ProfileData, updated_at: Option<i64>,
    ) -> Result<CompactWrite, Error> {
        let updated_at = updated_at.unwrap_or_else(|| {
            data.grid_items
                .iter()
                .chain(&data.backlog_items)
                .filter_map(|item| parse_timestamp_ms(&item.updated))
                .fold(now_ms(), i64::max)
        });
        let user_name = user_name
            .filter(|name| !name.is_empty())
            .or(Some(data.profile.user_name.as_str()).filter(|name| !name.is_empty()));

        let compact = CompactProfileSnapshot {
            version: COMPACT_VERSION,
            updated_at,
            user_id: user_id.to_string(),
            user_name: user_name.map(str::to_string),
            profile: Some(CompactProfile::from(&data.profile)),
            grid: data.grid_items.iter().map(CompactItem::from).collect(),
            backlog: data.backlog_items.iter().map(CompactItem::from).collect(),
        };
        let serialized = serde_json::to_string(&compact)?;
        let bytes = serialized.len();

        if bytes > self.max_bytes {
            tracing::warn!(user_id, bytes, max = self.max_bytes, "compact profile snapshot oversized, skipped");
            return Ok(CompactWrite::SkippedOversize { bytes });
        }

        self.storage.set(&self.key(user_id), &serialized).await?;
        tracing::debug!(user_id, bytes, "compact profile snapshot saved");
        Ok(CompactWrite::Saved { bytes })
    }

    /// Read the compact snapshot for `user_id`.
    ///
    /// Unparsable values and other format versions are misses.
    pub async fn read(&self, user_id: &str) -> Result<Option<CompactProfileSnapshot>, Error> {
        let Some(raw) = self.storage.get(&self.key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<CompactProfileSnapshot>(&raw) {
            Ok(snapshot) if snapshot.version == COMPACT_VERSION => Ok(Some(snapshot)),
            Ok(snapshot) => {
                tracing::debug!(user_id, version = snapshot.version, "compact profile snapshot version mismatch");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "compact profile snapshot unreadable");
                Ok(None)
            }
        }
    }

    pub async fn clear(&self, user_id: &str) -> Result<(), Error> {
        self.storage.remove(&self.key(user_id)).await
    }
}

/// Parse a backend timestamp (RFC 3339 or `YYYY-MM-DD HH:MM:SS.sssZ`).
pub fn parse_timestamp_ms(value: &str) -> Option<i64> {
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.fZ")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn store(max_bytes: usize) -> (MemoryStorage, CompactStore) {
        let storage = MemoryStorage::new();
        (storage.clone(), CompactStore::new(Arc::new(storage), "1", max_bytes))
    }

    fn sample() -> ProfileData {
        ProfileData {
            profile: Profile { id: "u1".into(), user_name: "ana".into(), first_name: "Ana".into(), ..Default::default() },
            grid_items: vec![Item {
                id: "i1".into(),
                ref_id: "r1".into(),
                text: "climbing".into(),
                order: 2,
                updated: "2026-01-02 03:04:05.000Z".into(),
                ..Default::default()
            }],
            backlog_items: vec![Item { id: "i2".into(), ref_id: "r2".into(), backlog: true, ..Default::default() }],
        }
    }

    #[test]
    fn test_parse_timestamps() {
        assert_eq!(parse_timestamp_ms("1970-01-01T00:00:01Z"), Some(1_000));
        assert_eq!(parse_timestamp_ms("1970-01-01 00:00:02.500Z"), Some(2_500));
        assert_eq!(parse_timestamp_ms(""), None);
        assert_eq!(parse_timestamp_ms("yesterday"), None);
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (_, store) = store(45 * 1024);
        assert_eq!(store.key("u1"), "compact_profile_snapshot_v1:1:u1");

        let outcome = store.write("u1", Some("ana"), &sample(), Some(5_000)).await.unwrap();
        assert!(matches!(outcome, CompactWrite::Saved { .. }));

        let snapshot = store.read("u1").await.unwrap().unwrap();
        assert_eq!(snapshot.updated_at, 5_000);
        assert_eq!(snapshot.grid[0].title, "climbing");

        let data = snapshot.to_profile_data().unwrap();
        assert_eq!(data.profile.first_name, "Ana");
        assert_eq!(data.grid_items[0].order, 2);
        assert_eq!(data.grid_items[0].updated, "2026-01-02T03:04:05.000Z");
        assert!(data.backlog_items[0].backlog);
    }

    #[tokio::test]
    async fn test_oversize_is_skipped() {
        let (storage, store) = store(64);
        let outcome = store.write("u1", None, &sample(), None).await.unwrap();
        assert!(matches!(outcome, CompactWrite::SkippedOversize { bytes } if bytes > 64));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_other_version_is_a_miss() {
        let (storage, store) = store(45 * 1024);
        let foreign = serde_json::json!({"version": 9, "updatedAt": 1, "userId": "u1", "grid": [], "backlog": []});
        storage.set(&store.key("u1"), &foreign.to_string()).await.unwrap();
        assert!(store.read("u1").await.unwrap().is_none());

        storage.set(&store.key("u2"), "{").await.unwrap();
        assert!(store.read("u2").await.unwrap().is_none());
    }

    #[test]
    fn test_missing_user_name_cannot_be_reconstituted() {
        let snapshot = CompactProfileSnapshot {
            version: COMPACT_VERSION,
            updated_at: 1,
            user_id: "u1".into(),
            user_name: None,
            profile: None,
            grid: Vec::new(),
            backlog: Vec::new(),
        };
        assert!(snapshot.to_profile_data().is_none());

        let named = CompactProfileSnapshot { user_name: Some("ana".into()), ..snapshot };
        assert_eq!(named.to_profile_data().unwrap().profile.id, "u1");
    }

    #[tokio::test]
    async fn test_default_stamp_uses_newest_item() {
        let (_, store) = store(45 * 1024);
        let mut data = sample();
        data.grid_items[0].updated = "2999-01-01T00:00:00Z".into();
        store.write("u1", None, &data, None).await.unwrap();

        let snapshot = store.read("u1").await.unwrap().unwrap();
        assert_eq!(Some(snapshot.updated_at), parse_timestamp_ms("2999-01-01T00:00:00Z"));
        assert_eq!(snapshot.user_name.as_deref(), Some("ana"));
    }
}
