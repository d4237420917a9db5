//! Digest computation for cache keys.
//!
//! Digests must be stable across process restarts, so every provider here is
//! unseeded. Blank input is rejected: a query identity is never legitimately
//! empty, and caching under a degenerate key would hide the caller's defect.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// Computes a fixed-width, uppercase hex digest of a string.
pub trait HashProvider: Send + Sync + fmt::Debug {
    /// Hash `data`, failing with [`Error::InvalidInput`] when it is blank.
    fn hash(&self, data: &str) -> Result<String, Error>;
}

/// Selects which [`HashProvider`] the key deriver uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// 32-bit xxHash, 8 hex chars.
    #[default]
    Xxh32,
    /// SHA-256, 64 hex chars.
    Sha256,
}

/// XXH32 with seed 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh32Hasher;

impl HashProvider for Xxh32Hasher {
    fn hash(&self, data: &str) -> Result<String, Error> {
        ensure_not_blank(data)?;
        Ok(format!("{:08X}", xxhash_rust::xxh32::xxh32(data.as_bytes(), 0)))
    }
}

/// SHA-256 digest, for deployments that want a wider key space.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl HashProvider for Sha256Hasher {
    fn hash(&self, data: &str) -> Result<String, Error> {
        ensure_not_blank(data)?;
        Ok(hex::encode_upper(Sha256::digest(data.as_bytes())))
    }
}

/// Build the provider for `algorithm`.
pub fn hasher_for(algorithm: HashAlgorithm) -> Arc<dyn HashProvider> {
    match algorithm {
        HashAlgorithm::Xxh32 => Arc::new(Xxh32Hasher),
        HashAlgorithm::Sha256 => Arc::new(Sha256Hasher),
    }
}

fn ensure_not_blank(data: &str) -> Result<(), Error> {
    if data.trim().is_empty() {
        return Err(Error::InvalidInput("cannot hash a blank identity string".into()));
    }
    Ok(())
}
