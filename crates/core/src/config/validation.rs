//! Configuration validation rules.

use crate::config::{CacheConfig, StoreBackend};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl CacheConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the sqlite backend is selected
    /// without a `db_path`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StoreBackend::Sqlite && self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                field: "db_path".into(),
                hint: "Set DEPCACHE_DB_PATH when DEPCACHE_BACKEND=sqlite".into(),
            });
        }

        if self.coalesce_in_flight && !self.enabled {
            tracing::warn!("coalesce_in_flight is set but caching is disabled; it has no effect");
        }

        Ok(())
    }

    /// Require a usable database path regardless of the selected backend.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `db_path` is empty.
    pub fn require_db_path(&self) -> Result<&std::path::Path, ConfigError> {
        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid { field: "db_path".into(), reason: "must not be empty".into() });
        }
        Ok(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validate_default_config() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_sqlite_without_path() {
        let config = CacheConfig { backend: StoreBackend::Sqlite, db_path: PathBuf::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Missing { field, .. }) if field == "db_path"));
    }

    #[test]
    fn test_validate_memory_ignores_path() {
        let config = CacheConfig { db_path: PathBuf::new(), ..Default::default() };
        assert!(config.validate().is_ok());
        assert!(matches!(config.require_db_path(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_validate_coalesce_while_disabled_only_warns() {
        let config = CacheConfig { enabled: false, coalesce_in_flight: true, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
