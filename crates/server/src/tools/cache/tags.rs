//! cache_tags tool implementation.

use depcache_core::{SqliteStore, TagCount};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::json_result;

/// Parameters for the cache_tags tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CacheTagsParams {
    /// Only list tags starting with this prefix.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Output from the cache_tags tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheTagsOutput {
    pub tags: Vec<TagCount>,
}

/// Implementation of the cache_tags tool.
pub async fn tags_impl(store: &SqliteStore, params: CacheTagsParams) -> Result<CallToolResult, McpError> {
    let mut tags = store.tags().await?;
    if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
        tags.retain(|t| t.tag.starts_with(prefix));
    }

    json_result(&CacheTagsOutput { tags })
}
