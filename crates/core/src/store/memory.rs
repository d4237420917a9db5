//! In-process store backed by concurrent maps.
//!
//! Reads go straight to the value map. Every mutation (insert, invalidate,
//! clear) runs under one write gate, so an invalidation and an insert touching
//! the same tag can never interleave their value and index updates.

use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{CacheLookup, CacheStore, usable_tags};
use crate::Error;

struct StoredEntry<V> {
    value: Option<V>,
    dependencies: BTreeSet<String>,
}

/// Thread-safe in-memory store with a tag → digests reverse index.
pub struct MemoryStore<V> {
    values: DashMap<String, StoredEntry<V>>,
    /// Reverse index: tag -> digests that depend on it
    index: DashMap<String, HashSet<String>>,
    write_gate: Mutex<()>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self { values: DashMap::new(), index: DashMap::new(), write_gate: Mutex::new(()) }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tags currently indexed.
    pub fn tag_count(&self) -> usize {
        self.index.len()
    }

    /// Remove `digest` from `tag`'s index set, dropping the set once empty.
    fn detach(&self, tag: &str, digest: &str) {
        let emptied = match self.index.get_mut(tag) {
            Some(mut digests) => {
                digests.remove(digest);
                digests.is_empty()
            }
            None => false,
        };
        if emptied {
            self.index.remove_if(tag, |_, digests| digests.is_empty());
        }
    }
}

#[async_trait]
impl<V> CacheStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, digest: &str) -> Result<CacheLookup<V>, Error> {
        Ok(match self.values.get(digest) {
            Some(entry) => CacheLookup::Present(entry.value.clone()),
            None => CacheLookup::Absent,
        })
    }

    async fn insert(&self, digest: &str, value: Option<V>, dependencies: &BTreeSet<String>) -> Result<(), Error> {
        let dependencies: BTreeSet<String> = usable_tags(dependencies).into_iter().map(str::to_string).collect();

        let _gate = self.write_gate.lock();

        for tag in &dependencies {
            self.index.entry(tag.clone()).or_default().insert(digest.to_string());
        }

        let previous = self
            .values
            .insert(digest.to_string(), StoredEntry { value, dependencies: dependencies.clone() });

        if let Some(previous) = previous {
            for stale in previous.dependencies.difference(&dependencies) {
                self.detach(stale, digest);
            }
        }

        tracing::debug!(digest, tags = dependencies.len(), "cached entry");
        Ok(())
    }

    async fn invalidate(&self, tags: &[String]) -> Result<usize, Error> {
        let _gate = self.write_gate.lock();

        let mut removed = 0;
        for tag in usable_tags(tags) {
            let Some((_, digests)) = self.index.remove(tag) else {
                continue;
            };
            for digest in digests {
                if let Some((_, entry)) = self.values.remove(&digest) {
                    removed += 1;
                    for other in entry.dependencies.iter().filter(|other| other.as_str() != tag) {
                        self.detach(other, &digest);
                    }
                }
            }
            tracing::debug!(tag, "invalidated tag");
        }

        Ok(removed)
    }

    async fn clear(&self) -> Result<(), Error> {
        let _gate = self.write_gate.lock();
        self.values.clear();
        self.index.clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize, Error> {
        Ok(self.values.len())
    }
}
