//! cache_lookup tool implementation.
//!
//! Reports what the store holds for a digest. A cached null is distinct from
//! an absent entry.

use depcache_core::{CacheLookup, CacheStore, EntryInfo, SqliteStore};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AdminError, json_result};

/// Parameters for the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheLookupParams {
    /// Digest of the cache entry.
    pub digest: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Absent,
    Null,
    Value,
}

/// Output from the cache_lookup tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CacheLookupOutput {
    pub digest: String,
    pub state: EntryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Stored canonical text, timestamp and tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<EntryInfo>,
}

/// Implementation of the cache_lookup tool.
pub async fn lookup_impl(store: &SqliteStore, params: CacheLookupParams) -> Result<CallToolResult, McpError> {
    let digest = params.digest.trim().to_string();
    if digest.is_empty() {
        return Err(AdminError::InvalidInput("digest must not be empty".into()).into());
    }

    let lookup: CacheLookup<Value> = store.get(&digest).await?;
    let (state, value) = match lookup {
        CacheLookup::Absent => (EntryState::Absent, None),
        CacheLookup::Present(None) => (EntryState::Null, None),
        CacheLookup::Present(Some(value)) => (EntryState::Value, Some(value)),
    };
    let entry = match state {
        EntryState::Absent => None,
        EntryState::Null | EntryState::Value => store.describe(&digest).await?,
    };

    json_result(&CacheLookupOutput { digest, state, value, entry })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::cache::output_text;
    use std::collections::BTreeSet;

    fn deps(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    async fn lookup(store: &SqliteStore, digest: &str) -> CacheLookupOutput {
        let result = lookup_impl(store, CacheLookupParams { digest: digest.to_string() }).await.unwrap();
        serde_json::from_str(&output_text(&result)).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_absent() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let output = lookup(&store, "0BADF00D").await;
        assert_eq!(output.state, EntryState::Absent);
        assert!(output.value.is_none());
        assert!(output.entry.is_none());
    }

    #[tokio::test]
    async fn test_lookup_null_and_value() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert("N1", None::<Value>, &deps(&["products"])).await.unwrap();
        store.insert("V1", Some(serde_json::json!({"rows": 2})), &deps(&["products"])).await.unwrap();

        let null = lookup(&store, "N1").await;
        assert_eq!(null.state, EntryState::Null);
        assert!(null.value.is_none());
        assert_eq!(null.entry.unwrap().tags, vec!["products".to_string()]);

        let value = lookup(&store, "V1").await;
        assert_eq!(value.state, EntryState::Value);
        assert_eq!(value.value, Some(serde_json::json!({"rows": 2})));
    }

    #[tokio::test]
    async fn test_lookup_empty_digest() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let result = lookup_impl(&store, CacheLookupParams { digest: "  ".into() }).await;
        assert!(result.is_err());
    }
}
