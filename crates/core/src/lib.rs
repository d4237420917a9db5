//! Core types and shared functionality for depcache.
//!
//! This crate provides:
//! - Expression trees and their canonical rendering
//! - Cache key derivation over pluggable hash providers
//! - Dependency-indexed stores (in-memory and SQLite)
//! - The read-through Materializer
//! - Unified error types and configuration

pub mod config;
pub mod error;
pub mod expr;
pub mod hash;
pub mod invalidation;
pub mod key;
pub mod materialize;
pub mod stats;
pub mod store;

pub use config::{CacheConfig, ConfigError, StoreBackend};
pub use error::Error;
pub use expr::{Canonical, Expr, canonicalize};
pub use hash::{HashAlgorithm, HashProvider, Sha256Hasher, Xxh32Hasher, hasher_for};
pub use invalidation::InvalidationEvent;
pub use key::{CacheKey, KeyDeriver, PlanCompiler};
pub use materialize::{Materialized, Materializer, Outcome};
pub use stats::{CacheStats, StatsSnapshot};
pub use store::{CacheLookup, CacheStore, EntryInfo, MemoryStore, SqliteStore, TagCount};
