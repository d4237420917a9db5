//! Structured errors for the depcache admin server.
//!
//! Core failures arrive as `depcache_core::Error` and convert on their own;
//! these cover request validation that only makes sense at the tool layer.

use rmcp::model::{ErrorCode, ErrorData as McpError};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// Invalid input parameters (e.g., an empty tag list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// The `tree` argument is not a valid expression tree.
    #[error("INVALID_INPUT: malformed expression tree: {0}")]
    InvalidTree(String),

    /// Tool output could not be rendered as JSON.
    #[error("CACHE_ERROR: failed to serialize output: {0}")]
    Serialize(String),
}

impl From<AdminError> for McpError {
    fn from(err: AdminError) -> Self {
        let (code, message) = match &err {
            AdminError::InvalidInput(_) | AdminError::InvalidTree(_) => (-32602, err.to_string()),
            AdminError::Serialize(_) => (-32002, err.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

/// Render tool output as pretty JSON text content.
pub fn json_result<T: serde::Serialize>(output: &T) -> Result<rmcp::model::CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(output).map_err(|e| AdminError::Serialize(e.to_string()))?;
    Ok(rmcp::model::CallToolResult::success(vec![rmcp::model::Content::text(json)]))
}
