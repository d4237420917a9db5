//! Cache key derivation.
//!
//! A key's identity is `plan_text + "\n" + rendering + "\n" + salt`. The plan
//! text disambiguates queries whose trees render identically but compile to
//! different operations (eager-loading directives, for instance).

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use crate::Error;
use crate::expr::{Expr, canonicalize};
use crate::hash::{HashAlgorithm, HashProvider, hasher_for};

/// Identity of one query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheKey {
    canonical_text: String,
    digest: String,
    dependencies: BTreeSet<String>,
}

impl CacheKey {
    /// Full identity string; kept for diagnostics only.
    pub fn canonical_text(&self) -> &str {
        &self.canonical_text
    }

    /// Lookup key.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Dependency tags. Empty for queries over scalars only; such entries can
    /// only be removed by a full clear.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }
}

/// Supplies the canonical plan text for a query.
///
/// Must be deterministic for equivalent compiled queries and must differ
/// whenever two queries would execute different operations.
pub trait PlanCompiler: Send + Sync {
    fn compile(&self, tree: &Expr) -> Result<String, Error>;
}

/// Turns (plan text, tree, salt) into a [`CacheKey`].
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    hasher: Arc<dyn HashProvider>,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self::with_algorithm(HashAlgorithm::default())
    }
}

impl KeyDeriver {
    pub fn new(hasher: Arc<dyn HashProvider>) -> Self {
        Self { hasher }
    }

    pub fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        Self::new(hasher_for(algorithm))
    }

    /// Derive the key for a query.
    ///
    /// # Errors
    ///
    /// Propagates the hash provider's rejection of a blank identity.
    pub fn derive(&self, plan_text: &str, tree: &Expr, salt: &str) -> Result<CacheKey, Error> {
        let canonical = canonicalize(tree);
        let canonical_text = format!("{plan_text}\n{}\n{salt}", canonical.rendering);
        let digest = self.hasher.hash(&canonical_text)?;
        Ok(CacheKey { canonical_text, digest, dependencies: canonical.types })
    }

    /// Compile the plan with `compiler`, then derive. Compiler failures are
    /// returned unchanged.
    pub fn derive_with(&self, compiler: &dyn PlanCompiler, tree: &Expr, salt: &str) -> Result<CacheKey, Error> {
        let plan_text = compiler.compile(tree)?;
        self.derive(&plan_text, tree, salt)
    }
}
