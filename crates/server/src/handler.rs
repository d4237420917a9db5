//! MCP server handler implementation.
//!
//! Routes admin tool calls to their implementations over a shared store.

use crate::tools::cache::{
    CacheClearParams, CacheInvalidateParams, CacheKeyParams, CacheLookupParams, CacheTagsParams, clear_impl,
    invalidate_impl, key_impl, lookup_impl, tags_impl,
};

use depcache_core::{KeyDeriver, SqliteStore};
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

/// Admin handler over one cache database.
#[derive(Clone)]
pub struct DepcacheAdmin {
    tool_router: ToolRouter<Self>,
    store: SqliteStore,
    deriver: KeyDeriver,
    default_salt: String,
}

#[tool_router]
impl DepcacheAdmin {
    pub fn new(store: SqliteStore, deriver: KeyDeriver, default_salt: String) -> Self {
        Self { tool_router: Self::tool_router(), store, deriver, default_salt }
    }

    #[tool(description = "Look up a cache entry by digest. Reports whether it is absent, a cached null, or a value.")]
    async fn cache_lookup(&self, params: Parameters<CacheLookupParams>) -> Result<CallToolResult, McpError> {
        lookup_impl(&self.store, params.0).await
    }

    #[tool(description = "Invalidate every cache entry that depends on any of the given tags.")]
    async fn cache_invalidate(&self, params: Parameters<CacheInvalidateParams>) -> Result<CallToolResult, McpError> {
        invalidate_impl(&self.store, params.0).await
    }

    #[tool(description = "Remove every cache entry. Requires confirm=true.")]
    async fn cache_clear(&self, params: Parameters<CacheClearParams>) -> Result<CallToolResult, McpError> {
        clear_impl(&self.store, params.0).await
    }

    #[tool(description = "Derive the cache key (digest, canonical text, dependency tags) for a plan text and expression tree.")]
    async fn cache_key(&self, params: Parameters<CacheKeyParams>) -> Result<CallToolResult, McpError> {
        key_impl(&self.store, &self.deriver, &self.default_salt, params.0).await
    }

    #[tool(description = "List dependency tags with the number of cache entries indexed under each.")]
    async fn cache_tags(&self, params: Parameters<CacheTagsParams>) -> Result<CallToolResult, McpError> {
        tags_impl(&self.store, params.0).await
    }
}

impl ServerHandler for DepcacheAdmin {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "depcache-admin".into(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_router_lists_admin_tools() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let admin = DepcacheAdmin::new(store, KeyDeriver::default(), String::new());

        let mut names: Vec<String> = admin.tool_router.list_all().into_iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["cache_clear", "cache_invalidate", "cache_key", "cache_lookup", "cache_tags"]);
    }
}
