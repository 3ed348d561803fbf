//! snapshot_sweep tool implementation.

use rmcp::{ErrorData as McpError, model::CallToolResult};
use snapcache_core::SnapshotStore;

use super::json_result;

/// Run the hygiene sweep and return its [`snapcache_core::SweepReport`].
pub async fn sweep_impl(store: &SnapshotStore) -> Result<CallToolResult, McpError> {
    let report = store.sweep().await?;
    tracing::info!(evicted = report.evicted, orphan_chunks = report.orphan_chunks, "snapshot sweep finished");
    json_result(&report)
}
