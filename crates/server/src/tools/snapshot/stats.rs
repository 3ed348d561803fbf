//! snapshot_stats tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use snapcache_core::SnapshotStore;

use super::json_result;

pub async fn stats_impl(store: &SnapshotStore) -> Result<CallToolResult, McpError> {
    json_result(&store.stats().await?)
}
