//! snapcache-mcp server entry point.
//!
//! Boots the MCP server on stdio transport over the configured SQLite store.
//! Logging goes to stderr to avoid interfering with the JSON-RPC protocol on stdout.

use std::sync::Arc;

use anyhow::Result;
use rmcp::service::serve_server;
use rmcp::transport::io::stdio;
use snapcache_core::snapshot::SnapshotConfig;
use snapcache_core::{AppConfig, SnapshotStore, SqliteStorage};
use tracing_subscriber::EnvFilter;

mod handler;
mod tools;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load()?;
    tracing::info!(db_path = %config.db_path.display(), "Starting snapcache-mcp server on stdio transport");

    let storage = SqliteStorage::open(&config.db_path).await?;
    let store = Arc::new(SnapshotStore::new(Arc::new(storage), SnapshotConfig::from(&config)));
    store.migrate().await?;

    let handler = handler::SnapcacheServer::new(store);
    let transport = stdio();
    let server = serve_server(handler, transport).await?;

    server.waiting().await?;

    Ok(())
}
