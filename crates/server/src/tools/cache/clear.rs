//! cache_clear tool implementation.

use depcache_core::SqliteStore;
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{AdminError, json_result};

/// Parameters for the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearParams {
    /// Must be true; guards against accidental wipes.
    #[serde(default)]
    pub confirm: bool,
}

/// Output from the cache_clear tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheClearOutput {
    pub cleared: bool,
    /// Number of entries that were present.
    pub removed: usize,
}

/// Implementation of the cache_clear tool.
pub async fn clear_impl(store: &SqliteStore, params: CacheClearParams) -> Result<CallToolResult, McpError> {
    if !params.confirm {
        return Err(AdminError::InvalidInput("set confirm=true to clear the cache".into()).into());
    }

    let removed = store.len().await?;
    store.clear().await?;
    tracing::warn!(removed, "cache cleared via admin");

    json_result(&CacheClearOutput { cleared: true, removed })
}
