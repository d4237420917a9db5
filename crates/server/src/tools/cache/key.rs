//! cache_key tool implementation.
//!
//! Derives the key a host would compute for a query, so an operator can see
//! which digest and tags a query maps to and whether it is currently cached.

use depcache_core::{CacheLookup, CacheStore, Expr, KeyDeriver, SqliteStore};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AdminError, json_result};

/// Parameters for the cache_key tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheKeyParams {
    /// Canonical plan text produced by the host's plan compiler.
    pub plan_text: String,

    /// Expression tree in its JSON form (`{"node": "...", ...}`).
    pub tree: Value,

    /// Key salt; the configured default salt is used when omitted.
    #[serde(default)]
    pub salt: Option<String>,
}

/// Output from the cache_key tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheKeyOutput {
    pub digest: String,
    pub canonical_text: String,
    pub dependencies: Vec<String>,
    /// Whether the store currently holds an entry (value or null) for the digest.
    pub cached: bool,
}

/// Implementation of the cache_key tool.
pub async fn key_impl(
    store: &SqliteStore, deriver: &KeyDeriver, default_salt: &str, params: CacheKeyParams,
) -> Result<CallToolResult, McpError> {
    let tree: Expr = serde_json::from_value(params.tree).map_err(|e| AdminError::InvalidTree(e.to_string()))?;
    let salt = params.salt.as_deref().unwrap_or(default_salt);

    let key = deriver.derive(&params.plan_text, &tree, salt)?;
    let lookup: CacheLookup<Value> = store.get(key.digest()).await?;

    json_result(&CacheKeyOutput {
        digest: key.digest().to_string(),
        canonical_text: key.canonical_text().to_string(),
        dependencies: key.dependencies().iter().cloned().collect(),
        cached: lookup.is_present(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::cache::output_text;
    use depcache_core::expr::TypeRef;

    fn products_tree() -> Value {
        serde_json::to_value(Expr::query_root(TypeRef::class("products"))).unwrap()
    }

    async fn derive(store: &SqliteStore, salt: Option<&str>) -> CacheKeyOutput {
        let params = CacheKeyParams {
            plan_text: "SELECT * FROM products".into(),
            tree: products_tree(),
            salt: salt.map(str::to_string),
        };
        let result = key_impl(store, &KeyDeriver::default(), "", params).await.unwrap();
        serde_json::from_str(&output_text(&result)).unwrap()
    }

    #[tokio::test]
    async fn test_key_matches_deriver() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let output = derive(&store, None).await;

        let expected = KeyDeriver::default()
            .derive("SELECT * FROM products", &Expr::query_root(TypeRef::class("products")), "")
            .unwrap();
        assert_eq!(output.digest, expected.digest());
        assert_eq!(output.canonical_text, expected.canonical_text());
        assert_eq!(output.dependencies, vec!["Query".to_string(), "products".to_string()]);
        assert!(!output.cached);
    }

    #[tokio::test]
    async fn test_key_reports_cached() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let unsalted = derive(&store, None).await;
        let key = KeyDeriver::default()
            .derive("SELECT * FROM products", &Expr::query_root(TypeRef::class("products")), "")
            .unwrap();
        store.insert_key(&key, Some(Value::from(3))).await.unwrap();

        assert!(derive(&store, None).await.cached);

        let salted = derive(&store, Some("tenant-b")).await;
        assert_ne!(salted.digest, unsalted.digest);
        assert!(!salted.cached);
    }

    #[tokio::test]
    async fn test_key_rejects_malformed_tree() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let params = CacheKeyParams {
            plan_text: "SELECT 1".into(),
            tree: serde_json::json!({"node": "teleport"}),
            salt: None,
        };
        let err = key_impl(&store, &KeyDeriver::default(), "", params).await.unwrap_err();
        assert!(err.message.contains("malformed expression tree"));
    }
}
