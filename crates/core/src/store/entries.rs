//! Entry and tag-index operations for the SQLite store.
//!
//! Values are stored as JSON text. A cached null has `is_null = 1` and no
//! value. The `entry_tags` table is the reverse index; its rows cascade away
//! with their entry, so the index can never point at a missing value.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::SqliteStore;
use super::{CacheLookup, CacheStore, usable_tags};
use crate::Error;
use crate::key::CacheKey;

/// Diagnostic view of one stored entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct EntryInfo {
    pub digest: String,
    /// Identity string the digest was computed from, when it was recorded.
    pub canonical_text: Option<String>,
    pub created_at: String,
    pub is_null: bool,
    pub tags: Vec<String>,
}

/// Number of live entries indexed under a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TagCount {
    pub tag: String,
    pub entries: u64,
}

fn encode<V: Serialize>(value: Option<&V>) -> Result<Option<String>, Error> {
    value
        .map(|v| serde_json::to_string(v).map_err(|e| Error::Serialization(e.to_string())))
        .transpose()
}

impl SqliteStore {
    async fn write_entry(
        &self, digest: &str, value_json: Option<String>, canonical_text: Option<String>,
        dependencies: &BTreeSet<String>,
    ) -> Result<(), Error> {
        let digest = digest.to_string();
        let tags: Vec<String> = usable_tags(dependencies).into_iter().map(str::to_string).collect();
        let tag_count = tags.len();
        let now = chrono::Utc::now().to_rfc3339();
        let logged = digest.clone();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO entries (digest, value_json, is_null, canonical_text, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(digest) DO UPDATE SET
                        value_json = excluded.value_json,
                        is_null = excluded.is_null,
                        canonical_text = COALESCE(excluded.canonical_text, entries.canonical_text),
                        created_at = excluded.created_at",
                    params![digest, value_json, i32::from(value_json.is_none()), canonical_text, now],
                )?;
                tx.execute("DELETE FROM entry_tags WHERE digest = ?1", params![digest])?;
                {
                    let mut stmt = tx.prepare("INSERT OR IGNORE INTO entry_tags (tag, digest) VALUES (?1, ?2)")?;
                    for tag in &tags {
                        stmt.execute(params![tag, digest])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(digest = %logged, tags = tag_count, "cached entry");
        Ok(())
    }

    /// Remove every entry tagged with any of `tags`.
    ///
    /// Runs in one transaction. Returns the number of entries removed.
    pub async fn invalidate(&self, tags: &[String]) -> Result<usize, Error> {
        let tags: Vec<String> = usable_tags(tags).into_iter().map(str::to_string).collect();
        if tags.is_empty() {
            return Ok(0);
        }

        let removed = self
            .conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let mut removed = 0;
                for tag in &tags {
                    removed += tx.execute(
                        "DELETE FROM entries WHERE digest IN (SELECT digest FROM entry_tags WHERE tag = ?1)",
                        params![tag],
                    )?;
                    tx.execute("DELETE FROM entry_tags WHERE tag = ?1", params![tag])?;
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(Error::from)?;

        tracing::debug!(removed, "invalidated tags");
        Ok(removed)
    }

    /// Drop every entry and the whole tag index.
    pub async fn clear(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM entry_tags", [])?;
                tx.execute("DELETE FROM entries", [])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<usize, Error> {
        self.conn
            .call(|conn| -> Result<usize, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }

    /// Look up an entry's metadata and tags without decoding its value.
    pub async fn describe(&self, digest: &str) -> Result<Option<EntryInfo>, Error> {
        let digest = digest.to_string();
        self.conn
            .call(move |conn| -> Result<Option<EntryInfo>, Error> {
                let row = conn.query_row(
                    "SELECT canonical_text, created_at, is_null FROM entries WHERE digest = ?1",
                    params![digest],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i32>(2)? == 1,
                        ))
                    },
                );

                let (canonical_text, created_at, is_null) = match row {
                    Ok(r) => r,
                    Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                    Err(e) => return Err(e.into()),
                };

                let mut stmt = conn.prepare("SELECT tag FROM entry_tags WHERE digest = ?1 ORDER BY tag")?;
                let tags = stmt
                    .query_map(params![digest], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;

                Ok(Some(EntryInfo { digest, canonical_text, created_at, is_null, tags }))
            })
            .await
            .map_err(Error::from)
    }

    /// Every indexed tag with its entry count, busiest first.
    pub async fn tags(&self) -> Result<Vec<TagCount>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<TagCount>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT tag, COUNT(*) AS entries FROM entry_tags
                     GROUP BY tag ORDER BY entries DESC, tag ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(TagCount { tag: row.get(0)?, entries: row.get::<_, i64>(1)? as u64 })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl<V> CacheStore<V> for SqliteStore
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, digest: &str) -> Result<CacheLookup<V>, Error> {
        let key = digest.to_string();
        let row = self
            .conn
            .call(move |conn| -> Result<Option<(Option<String>, bool)>, Error> {
                let result = conn.query_row(
                    "SELECT value_json, is_null FROM entries WHERE digest = ?1",
                    params![key],
                    |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i32>(1)? == 1)),
                );
                match result {
                    Ok(r) => Ok(Some(r)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        match row {
            None => Ok(CacheLookup::Absent),
            Some((_, true)) => Ok(CacheLookup::Present(None)),
            Some((Some(json), false)) => serde_json::from_str(&json)
                .map(|value| CacheLookup::Present(Some(value)))
                .map_err(|e| Error::Serialization(format!("{digest}: {e}"))),
            Some((None, false)) => Err(Error::Serialization(format!("{digest}: entry has no value"))),
        }
    }

    async fn insert(&self, digest: &str, value: Option<V>, dependencies: &BTreeSet<String>) -> Result<(), Error> {
        let json = encode(value.as_ref())?;
        self.write_entry(digest, json, None, dependencies).await
    }

    async fn insert_key(&self, key: &CacheKey, value: Option<V>) -> Result<(), Error> {
        let json = encode(value.as_ref())?;
        self.write_entry(key.digest(), json, Some(key.canonical_text().to_string()), key.dependencies())
            .await
    }

    async fn invalidate(&self, tags: &[String]) -> Result<usize, Error> {
        SqliteStore::invalidate(self, tags).await
    }

    async fn clear(&self) -> Result<(), Error> {
        SqliteStore::clear(self).await
    }

    async fn len(&self) -> Result<usize, Error> {
        SqliteStore::len(self).await
    }
}
