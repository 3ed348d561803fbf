//! snapshot_remove tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snapcache_core::SnapshotStore;

use super::{SnapshotKeyParams, json_result};

/// Output from the snapshot_remove tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotRemoveOutput {
    pub key: String,
    /// Whether a valid snapshot existed before removal.
    pub existed: bool,
}

pub async fn remove_impl(store: &SnapshotStore, params: SnapshotKeyParams) -> Result<CallToolResult, McpError> {
    let descriptor = store.descriptor(&params.kind()?);
    let existed = store.get::<Value>(&descriptor).await?.is_some();
    store.remove(&descriptor).await?;
    tracing::info!(key = descriptor.storage_key(), existed, "snapshot removed");

    json_result(&SnapshotRemoveOutput { key: descriptor.storage_key().to_string(), existed })
}
