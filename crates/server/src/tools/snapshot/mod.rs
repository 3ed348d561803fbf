//! Snapshot inspection and hygiene tools.

pub mod get;
pub mod remove;
pub mod stats;
pub mod sweep;

use rmcp::{
    ErrorData as McpError,
    model::{CallToolResult, Content},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snapcache_core::{Error, SnapshotKind};

pub use get::get_impl;
pub use remove::remove_impl;
pub use stats::stats_impl;
pub use sweep::sweep_impl;

/// Identifies one snapshot by family and id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotKeyParams {
    /// Snapshot family: "directory", "profile", "profileHeader", "wantToMeet", "messages" or "chat".
    pub kind: String,

    /// Community id for "directory", conversation id for "chat", user id otherwise.
    pub id: String,
}

impl SnapshotKeyParams {
    fn kind(&self) -> Result<SnapshotKind, Error> {
        SnapshotKind::parse(&self.kind, &self.id)
    }
}

fn json_result<T: Serialize>(output: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output)
        .map_err(|e| Error::Serialize(format!("Failed to serialize output: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

#[cfg(test)]
pub(crate) fn output_of<T: serde::de::DeserializeOwned>(result: &CallToolResult) -> T {
    let content_val = serde_json::to_value(&result.content[0]).unwrap();
    let text = content_val
        .get("text")
        .and_then(|v| v.as_str())
        .expect("Expected text field in content");
    serde_json::from_str(text).unwrap()
}

#[cfg(test)]
pub(crate) fn test_store() -> std::sync::Arc<snapcache_core::SnapshotStore> {
    use snapcache_core::MemoryStorage;
    use snapcache_core::snapshot::SnapshotConfig;

    std::sync::Arc::new(snapcache_core::SnapshotStore::new(
        std::sync::Arc::new(MemoryStorage::new()),
        SnapshotConfig::default(),
    ))
}
