//! Unified error types for depcache.
//!
//! Every variant renders with a stable upper-case code prefix so that log lines
//! and admin tool responses can be matched without parsing free text.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the cache core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input (e.g., a blank string handed to the hash provider).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No cache entry found for the given digest.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// The backing store could not be reached.
    #[error("CACHE_UNAVAILABLE: {0}")]
    CacheUnavailable(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A cached value could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(String),

    /// The plan compiler could not produce a plan for the query.
    #[error("PLAN_FAILED: {0}")]
    PlanFailed(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => {
                Error::CacheUnavailable("database connection closed".to_string())
            }
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::CacheUnavailable("database connection closed".to_string()),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::Serialization(msg) => (-32002, msg.clone()),
            Error::CacheUnavailable(msg) => (-32003, msg.clone()),
            Error::PlanFailed(msg) => (-32004, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::CacheMiss("0A1B2C3D".to_string());
        assert!(err.to_string().contains("CACHE_MISS"));
        assert!(err.to_string().contains("0A1B2C3D"));
    }

    #[test]
    fn test_error_to_mcp_error() {
        let err = Error::CacheMiss("0A1B2C3D".to_string());
        let mcp_err: McpError = err.into();
        assert_eq!(mcp_err.code.0, -32001);

        let mcp_err: McpError = Error::InvalidInput("blank".into()).into();
        assert_eq!(mcp_err.code.0, -32602);
    }

    #[test]
    fn test_connection_closed_is_unavailable() {
        let err: Error = tokio_rusqlite::Error::<Error>::ConnectionClosed.into();
        assert!(matches!(err, Error::CacheUnavailable(_)));
    }

    #[test]
    fn test_inner_error_unwrapped() {
        let err: Error = tokio_rusqlite::Error::Error(Error::PlanFailed("no plan".into())).into();
        assert!(matches!(err, Error::PlanFailed(msg) if msg == "no plan"));
    }
}
