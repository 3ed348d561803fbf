//! snapshot_get tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snapcache_core::{Envelope, Error, SnapshotStore};

use super::{SnapshotKeyParams, json_result};

/// Output from the snapshot_get tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotGetOutput {
    /// Storage key the snapshot was read from.
    pub key: String,
    pub envelope: Envelope<Value>,
}

/// Read a valid snapshot. Expired, outdated or corrupt entries are evicted
/// by the store and reported as a miss.
pub async fn get_impl(store: &SnapshotStore, params: SnapshotKeyParams) -> Result<CallToolResult, McpError> {
    let descriptor = store.descriptor(&params.kind()?);
    let envelope = store
        .get::<Value>(&descriptor)
        .await?
        .ok_or_else(|| Error::CacheMiss(descriptor.storage_key().to_string()))?;

    json_result(&SnapshotGetOutput { key: descriptor.storage_key().to_string(), envelope })
}
