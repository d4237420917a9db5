//! Cache administration tools.
//!
//! Each tool is a plain `*_impl` function over the store so it can be tested
//! without a transport.

pub mod clear;
pub mod invalidate;
pub mod key;
pub mod lookup;
pub mod tags;

pub use clear::{CacheClearParams, clear_impl};
pub use invalidate::{CacheInvalidateParams, invalidate_impl};
pub use key::{CacheKeyParams, key_impl};
pub use lookup::{CacheLookupParams, lookup_impl};
pub use tags::{CacheTagsParams, tags_impl};

#[cfg(test)]
pub(crate) fn output_text(result: &rmcp::model::CallToolResult) -> String {
    let content_val = serde_json::to_value(&result.content[0]).unwrap();
    content_val
        .get("text")
        .and_then(|v| v.as_str())
        .expect("Expected text field in content")
        .to_string()
}
