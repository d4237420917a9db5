//! Cache configuration with layered loading.
//!
//! Sources, highest precedence first:
//!
//! 1. Environment variables (DEPCACHE_*)
//! 2. TOML config file (if DEPCACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::hash::HashAlgorithm;

mod validation;

pub use validation::ConfigError;

/// Where cached values live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local concurrent maps; lost on restart.
    #[default]
    Memory,
    /// SQLite file at `db_path`.
    Sqlite,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false the Materializer always computes and never stores.
    ///
    /// Set via DEPCACHE_ENABLED environment variable.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Set via DEPCACHE_BACKEND (`memory` or `sqlite`).
    #[serde(default)]
    pub backend: StoreBackend,

    /// Path to the SQLite cache database.
    ///
    /// Set via DEPCACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Digest function for cache keys (`xxh32` or `sha256`).
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Let only one caller compute a given digest at a time.
    #[serde(default)]
    pub coalesce_in_flight: bool,

    /// Salt used when the caller supplies none.
    #[serde(default)]
    pub default_salt: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./depcache.sqlite")
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: StoreBackend::default(),
            db_path: default_db_path(),
            hash_algorithm: HashAlgorithm::default(),
            coalesce_in_flight: false,
            default_salt: String::new(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the config file or environment cannot be
    /// parsed, or if validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("DEPCACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("DEPCACHE_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
