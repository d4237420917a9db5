//! MCP tool implementations.

pub mod cache;
