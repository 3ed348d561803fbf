//! MCP server handler implementation.
//!
//! Routes tool calls to the snapshot tools in [`crate::tools`].
use std::sync::Arc;

use crate::tools::snapshot::{self, SnapshotKeyParams};

use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{
        tool::{ToolCallContext, ToolRouter},
        wrapper::Parameters,
    },
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult, PaginatedRequestParam, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use snapcache_core::SnapshotStore;

/// The MCP server handler for snapcache.
#[derive(Clone)]
pub struct SnapcacheServer {
    store: Arc<SnapshotStore>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SnapcacheServer {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Self { store, tool_router: Self::tool_router() }
    }

    #[tool(description = "Read a snapshot by kind (directory, profile, profileHeader, wantToMeet, messages, chat) and id. \
        Returns the envelope, or CACHE_MISS when no valid snapshot exists.")]
    async fn snapshot_get(&self, params: Parameters<SnapshotKeyParams>) -> Result<CallToolResult, McpError> {
        snapshot::get_impl(&self.store, params.0).await
    }

    #[tool(description = "Remove a snapshot and any chunks it was split into.")]
    async fn snapshot_remove(&self, params: Parameters<SnapshotKeyParams>) -> Result<CallToolResult, McpError> {
        snapshot::remove_impl(&self.store, params.0).await
    }

    /// Runs regardless of whether the boot migration already happened.
    #[tool(description = "Evict expired, outdated or corrupt snapshots and orphaned chunks.")]
    async fn snapshot_sweep(&self) -> Result<CallToolResult, McpError> {
        snapshot::sweep_impl(&self.store).await
    }

    #[tool(description = "Count snapshot records, chunk keys and stored bytes.")]
    async fn snapshot_stats(&self) -> Result<CallToolResult, McpError> {
        snapshot::stats_impl(&self.store).await
    }
}

impl ServerHandler for SnapcacheServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "snapcache-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self, _request: Option<PaginatedRequestParam>, _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, rmcp::model::ErrorData> {
        Ok(ListToolsResult { meta: None, tools: self.tool_router.list_all(), next_cursor: None })
    }

    async fn call_tool(
        &self, request: CallToolRequestParam, context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, rmcp::model::ErrorData> {
        self.tool_router
            .call(ToolCallContext::new(self, request, context))
            .await
    }
}
