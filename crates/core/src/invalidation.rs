//! Change notifications that drive invalidation.
//!
//! A write to a record of type `T` must invalidate every query that read `T`
//! and every query that read one of `T`'s supertypes, since a query over a base
//! type sees rows of the derived type as well.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Something changed in the data the cache was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InvalidationEvent {
    /// Records of `entity` were inserted, updated or deleted.
    EntityChanged {
        entity: String,
        /// Supertypes and base interfaces of `entity`.
        #[serde(default)]
        ancestors: Vec<String>,
    },
    /// Drop everything.
    InvalidateAll,
}

impl InvalidationEvent {
    pub fn entity_changed(entity: impl Into<String>) -> Self {
        Self::EntityChanged { entity: entity.into(), ancestors: Vec::new() }
    }

    pub fn with_ancestors<I, S>(entity: impl Into<String>, ancestors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::EntityChanged { entity: entity.into(), ancestors: ancestors.into_iter().map(Into::into).collect() }
    }

    /// Tags to invalidate. Empty for `InvalidateAll`, which clears instead.
    pub fn tags(&self) -> Vec<String> {
        match self {
            Self::EntityChanged { entity, ancestors } => std::iter::once(entity)
                .chain(ancestors)
                .filter(|tag| !tag.trim().is_empty())
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Self::InvalidateAll => Vec::new(),
        }
    }
}
