//! MCP tool implementations.
//!
//! This module contains all tools exposed by the snapcache-mcp server.

pub mod snapshot;
