//! Dependency-indexed cache stores.
//!
//! A store keeps values by digest plus a reverse index from dependency tag to
//! the digests tagged with it. Two backends are provided:
//!
//! - [`MemoryStore`]: concurrent maps guarded by a single write gate
//! - [`SqliteStore`]: a SQLite file (WAL mode) via tokio-rusqlite, shareable
//!   between processes

pub mod connection;
pub mod entries;
pub mod memory;
pub mod migrations;

use std::collections::BTreeSet;

use async_trait::async_trait;

pub use crate::Error;
use crate::key::CacheKey;

pub use connection::SqliteStore;
pub use entries::{EntryInfo, TagCount};
pub use memory::MemoryStore;

/// Result of probing a store.
///
/// `Present(None)` is a cached null: the query ran and legitimately produced
/// nothing. It is never the same thing as `Absent`.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<V> {
    Absent,
    Present(Option<V>),
}

impl<V> CacheLookup<V> {
    pub fn is_present(&self) -> bool {
        matches!(self, CacheLookup::Present(_))
    }

    /// `Some(value)` when present, `None` when absent.
    pub fn present(self) -> Option<Option<V>> {
        match self {
            CacheLookup::Present(value) => Some(value),
            CacheLookup::Absent => None,
        }
    }
}

/// Contract every cache backend satisfies.
///
/// `insert` and `invalidate` must be mutually exclusive for overlapping tags so
/// that an invalidation can never be followed by a stale insert re-creating an
/// index entry for a tag that was just cleared.
#[async_trait]
pub trait CacheStore<V: Send + 'static>: Send + Sync {
    /// Probe a digest. An unknown digest is `Ok(Absent)`, not an error.
    async fn get(&self, digest: &str) -> Result<CacheLookup<V>, Error>;

    /// Store `value` (`None` for a cached null) under `digest`, replacing any
    /// previous value, and index it under every non-blank tag.
    async fn insert(&self, digest: &str, value: Option<V>, dependencies: &BTreeSet<String>) -> Result<(), Error>;

    /// Insert under a derived key. Backends that keep diagnostics override this
    /// to record the canonical text as well.
    async fn insert_key(&self, key: &CacheKey, value: Option<V>) -> Result<(), Error> {
        self.insert(key.digest(), value, key.dependencies()).await
    }

    /// Remove every entry tagged with any of `tags` and drop those tags' index
    /// entries. Unknown and blank tags are skipped. Returns the number of
    /// entries removed.
    async fn invalidate(&self, tags: &[String]) -> Result<usize, Error>;

    /// Drop all values and the whole index.
    async fn clear(&self) -> Result<(), Error>;

    /// Number of cached entries.
    async fn len(&self) -> Result<usize, Error>;
}

pub(crate) fn usable_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> BTreeSet<&'a str> {
    tags.into_iter()
        .map(String::as_str)
        .filter(|tag| !tag.trim().is_empty())
        .collect()
}
