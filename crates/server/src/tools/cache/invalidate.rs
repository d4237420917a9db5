//! cache_invalidate tool implementation.
//!
//! Drops every entry depending on any of the given tags. Hosts call this after
//! a write, passing the written type and its supertypes.

use depcache_core::SqliteStore;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, json_result};

/// Parameters for the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateParams {
    /// Dependency tags (type names) whose entries should be removed.
    pub tags: Vec<String>,
}

/// Output from the cache_invalidate tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheInvalidateOutput {
    /// Number of entries removed.
    pub removed: usize,
}

/// Implementation of the cache_invalidate tool.
pub async fn invalidate_impl(
    store: &SqliteStore, params: CacheInvalidateParams,
) -> Result<CallToolResult, McpError> {
    if params.tags.iter().all(|tag| tag.trim().is_empty()) {
        return Err(AdminError::InvalidInput("at least one non-empty tag is required".into()).into());
    }

    let removed = store.invalidate(&params.tags).await?;
    tracing::info!(tags = ?params.tags, removed, "invalidated via admin");

    json_result(&CacheInvalidateOutput { removed })
}
