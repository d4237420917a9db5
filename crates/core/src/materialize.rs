//! Read-through materialization.
//!
//! Derive the key, probe the store, and on a miss run the caller's computation
//! and store its result under the key's dependency tags. Store failures never
//! fail a query: a probe error is treated as a miss and an insert error is
//! logged and dropped.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::Error;
use crate::config::{CacheConfig, StoreBackend};
use crate::expr::Expr;
use crate::invalidation::InvalidationEvent;
use crate::key::{CacheKey, KeyDeriver, PlanCompiler};
use crate::stats::CacheStats;
use crate::store::{CacheLookup, CacheStore, MemoryStore, SqliteStore};

/// How a materialized value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Served from the store.
    Hit,
    /// Computed and stored.
    Miss,
    /// Computed without consulting or filling the store.
    Bypass,
}

/// A value plus the diagnostics of how it was obtained.
#[derive(Debug, Clone)]
pub struct Materialized<V> {
    pub value: Option<V>,
    pub outcome: Outcome,
    /// `None` when caching is disabled and no key was derived.
    pub key: Option<CacheKey>,
}

enum Probe<V> {
    Hit(Option<V>),
    Miss,
    Unavailable,
}

type Slots = DashMap<String, Arc<Mutex<()>>>;

/// Membership in the set of callers computing one digest.
///
/// The slot is removed from the map when its last member leaves, including a
/// member whose future was dropped mid-computation.
struct Flight<'a> {
    slots: &'a Slots,
    digest: String,
    slot: Arc<Mutex<()>>,
}

impl<'a> Flight<'a> {
    fn join(slots: &'a Slots, digest: &str) -> Self {
        let slot = slots.entry(digest.to_string()).or_default().clone();
        Self { slots, digest: digest.to_string(), slot }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        // Only the map may still hold the slot when it is removed.
        drop(std::mem::take(&mut self.slot));
        self.slots.remove_if(&self.digest, |_, slot| Arc::strong_count(slot) == 1);
    }
}

/// Read-through cache front end over a [`CacheStore`].
pub struct Materializer<V> {
    store: Arc<dyn CacheStore<V>>,
    deriver: KeyDeriver,
    stats: CacheStats,
    enabled: bool,
    coalesce: bool,
    default_salt: String,
    in_flight: Slots,
}

impl<V> Materializer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn CacheStore<V>>) -> Self {
        Self {
            store,
            deriver: KeyDeriver::default(),
            stats: CacheStats::new(),
            enabled: true,
            coalesce: false,
            default_salt: String::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn with_deriver(mut self, deriver: KeyDeriver) -> Self {
        self.deriver = deriver;
        self
    }

    /// Serialize `compute()` per digest so concurrent misses run it once.
    pub fn with_coalescing(mut self, coalesce: bool) -> Self {
        self.coalesce = coalesce;
        self
    }

    pub fn with_default_salt(mut self, salt: impl Into<String>) -> Self {
        self.default_salt = salt.into();
        self
    }

    /// When disabled every call computes and nothing is stored.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore<V>> {
        &self.store
    }

    pub fn deriver(&self) -> &KeyDeriver {
        &self.deriver
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Return the cached result for the query, computing and storing it on a
    /// miss. A cached null comes back as `Ok(None)` without recomputation.
    ///
    /// # Errors
    ///
    /// Key derivation errors and `compute()` errors. Store errors are never
    /// returned.
    pub async fn materialize<F, Fut, E>(
        &self, plan_text: &str, tree: &Expr, salt: Option<&str>, compute: F,
    ) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: From<Error>,
    {
        Ok(self.materialize_with_outcome(plan_text, tree, salt, compute).await?.value)
    }

    /// Compile the plan text with `compiler`, then materialize. Compiler errors
    /// are returned unchanged and `compute()` is not run.
    pub async fn materialize_query<F, Fut, E>(
        &self, compiler: &dyn PlanCompiler, tree: &Expr, salt: Option<&str>, compute: F,
    ) -> Result<Option<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: From<Error>,
    {
        let plan_text = compiler.compile(tree)?;
        self.materialize(&plan_text, tree, salt, compute).await
    }

    /// [`Materializer::materialize`] with the outcome and derived key attached.
    pub async fn materialize_with_outcome<F, Fut, E>(
        &self, plan_text: &str, tree: &Expr, salt: Option<&str>, compute: F,
    ) -> Result<Materialized<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
        E: From<Error>,
    {
        if !self.enabled {
            let value = compute().await?;
            return Ok(Materialized { value, outcome: Outcome::Bypass, key: None });
        }

        let key = self.deriver.derive(plan_text, tree, salt.unwrap_or(&self.default_salt))?;

        match self.probe(&key).await {
            Probe::Hit(value) => return Ok(self.hit(key, value)),
            Probe::Unavailable => {
                let value = compute().await?;
                return Ok(Materialized { value, outcome: Outcome::Bypass, key: Some(key) });
            }
            Probe::Miss => {}
        }

        if !self.coalesce {
            return self.fill(key, compute).await;
        }

        let flight = Flight::join(&self.in_flight, key.digest());
        let _turn = flight.slot.lock().await;

        // A caller ahead of us in the flight may have stored it already.
        match self.probe(&key).await {
            Probe::Hit(value) => Ok(self.hit(key, value)),
            Probe::Miss | Probe::Unavailable => self.fill(key, compute).await,
        }
    }

    async fn probe(&self, key: &CacheKey) -> Probe<V> {
        match self.store.get(key.digest()).await {
            Ok(CacheLookup::Present(value)) => Probe::Hit(value),
            Ok(CacheLookup::Absent) => Probe::Miss,
            Err(e) => {
                self.stats.record_unavailable();
                tracing::warn!(digest = key.digest(), error = %e, "cache probe failed; computing directly");
                Probe::Unavailable
            }
        }
    }

    fn hit(&self, key: CacheKey, value: Option<V>) -> Materialized<V> {
        self.stats.record_hit();
        tracing::debug!(digest = key.digest(), "cache hit");
        Materialized { value, outcome: Outcome::Hit, key: Some(key) }
    }

    async fn fill<F, Fut, E>(&self, key: CacheKey, compute: F) -> Result<Materialized<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<V>, E>>,
    {
        self.stats.record_miss();
        let value = compute().await?;

        match self.store.insert_key(&key, value.clone()).await {
            Ok(()) => {
                self.stats.record_insert();
                tracing::debug!(
                    digest = key.digest(),
                    tags = key.dependencies().len(),
                    "cache miss stored"
                );
            }
            Err(e) => {
                self.stats.record_unavailable();
                tracing::warn!(digest = key.digest(), error = %e, "cache insert failed; returning computed value");
            }
        }

        Ok(Materialized { value, outcome: Outcome::Miss, key: Some(key) })
    }

    /// Drop every entry tagged with any of `tags`. Returns the number removed.
    pub async fn invalidate(&self, tags: &[String]) -> Result<usize, Error> {
        let removed = self.store.invalidate(tags).await?;
        self.stats.record_invalidated(removed);
        tracing::debug!(?tags, removed, "invalidated");
        Ok(removed)
    }

    /// Drop everything. Returns the number of entries removed.
    pub async fn clear(&self) -> Result<usize, Error> {
        let removed = self.store.len().await?;
        self.store.clear().await?;
        self.stats.record_invalidated(removed);
        tracing::info!(removed, "cache cleared");
        Ok(removed)
    }

    /// React to a change notification.
    pub async fn apply(&self, event: &InvalidationEvent) -> Result<usize, Error> {
        match event {
            InvalidationEvent::EntityChanged { .. } => self.invalidate(&event.tags()).await,
            InvalidationEvent::InvalidateAll => self.clear().await,
        }
    }

    /// Digests currently being computed by a coalesced flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl<V> Materializer<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Build a materializer with the backend and options `config` selects.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, Error> {
        let store: Arc<dyn CacheStore<V>> = match config.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::<V>::new()),
            StoreBackend::Sqlite => Arc::new(SqliteStore::open(&config.db_path).await?),
        };

        tracing::info!(
            backend = ?config.backend,
            hash = ?config.hash_algorithm,
            enabled = config.enabled,
            "cache ready"
        );

        Ok(Self::new(store)
            .with_deriver(KeyDeriver::with_algorithm(config.hash_algorithm))
            .with_coalescing(config.coalesce_in_flight)
            .with_default_salt(config.default_salt.clone())
            .with_enabled(config.enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Param, TypeRef, UnaryOp};
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PLAN: &str = "SELECT * FROM products WHERE active";

    fn products() -> TypeRef {
        TypeRef::class("products")
    }

    /// `Queryable.Where(products, p => p.active == flag)`
    fn active_products(flag: bool) -> Expr {
        let p = Param::new("p", products());
        let predicate = Expr::lambda(
            [p.clone()],
            Expr::binary(
                BinaryOp::Equal,
                Expr::member(Expr::param(&p), "active", TypeRef::primitive("bool")),
                Expr::bool(flag),
            ),
        );
        Expr::static_call(
            TypeRef::class("Queryable"),
            "Where",
            vec![products()],
            vec![Expr::query_root(products()), Expr::unary(UnaryOp::Quote, predicate)],
            TypeRef::interface("IQueryable").of([products()]),
        )
    }

    fn memory<V: Clone + Send + Sync + 'static>() -> Materializer<V> {
        Materializer::new(Arc::new(MemoryStore::<V>::new()))
    }

    fn rows() -> Vec<String> {
        vec!["widget".into(), "gadget".into()]
    }

    async fn counted(calls: &AtomicUsize, value: Option<Vec<String>>) -> Result<Option<Vec<String>>, Error> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl CacheStore<i32> for DownStore {
        async fn get(&self, _digest: &str) -> Result<CacheLookup<i32>, Error> {
            Err(Error::CacheUnavailable("connection refused".into()))
        }
        async fn insert(&self, _: &str, _: Option<i32>, _: &BTreeSet<String>) -> Result<(), Error> {
            Err(Error::CacheUnavailable("connection refused".into()))
        }
        async fn invalidate(&self, _tags: &[String]) -> Result<usize, Error> {
            Err(Error::CacheUnavailable("connection refused".into()))
        }
        async fn clear(&self) -> Result<(), Error> {
            Err(Error::CacheUnavailable("connection refused".into()))
        }
        async fn len(&self) -> Result<usize, Error> {
            Ok(0)
        }
    }

    /// Reads work, writes fail.
    #[derive(Debug)]
    struct ReadOnlyStore;

    #[async_trait]
    impl CacheStore<i32> for ReadOnlyStore {
        async fn get(&self, _digest: &str) -> Result<CacheLookup<i32>, Error> {
            Ok(CacheLookup::Absent)
        }
        async fn insert(&self, _: &str, _: Option<i32>, _: &BTreeSet<String>) -> Result<(), Error> {
            Err(Error::CacheUnavailable("read-only replica".into()))
        }
        async fn invalidate(&self, _tags: &[String]) -> Result<usize, Error> {
            Ok(0)
        }
        async fn clear(&self) -> Result<(), Error> {
            Ok(())
        }
        async fn len(&self) -> Result<usize, Error> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_miss_hit_invalidate_miss() {
        let cache = memory::<Vec<String>>();
        let calls = AtomicUsize::new(0);
        let tree = active_products(true);

        let first = cache
            .materialize_with_outcome(PLAN, &tree, None, || counted(&calls, Some(rows())))
            .await
            .unwrap();
        assert_eq!(first.outcome, Outcome::Miss);
        assert_eq!(first.value, Some(rows()));
        assert!(first.key.as_ref().unwrap().dependencies().contains("products"));

        let second = cache
            .materialize_with_outcome(PLAN, &tree, None, || counted(&calls, Some(rows())))
            .await
            .unwrap();
        assert_eq!(second.outcome, Outcome::Hit);
        assert_eq!(second.value, Some(rows()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.invalidate(&["products".to_string()]).await.unwrap(), 1);

        let third = cache
            .materialize_with_outcome(PLAN, &tree, None, || counted(&calls, Some(rows())))
            .await
            .unwrap();
        assert_eq!(third.outcome, Outcome::Miss);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let snap = cache.stats().snapshot();
        assert_eq!((snap.hits, snap.misses, snap.inserts, snap.invalidated), (1, 2, 2, 1));
    }

    #[tokio::test]
    async fn test_different_parameters_do_not_share_entries() {
        let cache = memory::<Vec<String>>();
        let calls = AtomicUsize::new(0);

        cache.materialize(PLAN, &active_products(true), None, || counted(&calls, Some(rows()))).await.unwrap();
        cache.materialize(PLAN, &active_products(false), None, || counted(&calls, None)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_null_result_is_cached() {
        let cache = memory::<Vec<String>>();
        let calls = AtomicUsize::new(0);
        let tree = active_products(true);

        let first = cache.materialize(PLAN, &tree, None, || counted(&calls, None)).await.unwrap();
        let second = cache.materialize(PLAN, &tree, None, || counted(&calls, None)).await.unwrap();
        assert_eq!(first, None);
        assert_eq!(second, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_compute_error_propagates_and_is_not_cached() {
        let cache = memory::<i32>();
        let tree = active_products(true);

        let failed: Result<Option<i32>, Error> = cache
            .materialize(PLAN, &tree, None, || async { Err(Error::InvalidInput("upstream timeout".into())) })
            .await;
        assert!(matches!(failed, Err(Error::InvalidInput(msg)) if msg == "upstream timeout"));
        assert_eq!(cache.store().len().await.unwrap(), 0);

        let retried: Result<Option<i32>, Error> = cache.materialize(PLAN, &tree, None, || async { Ok(Some(7)) }).await;
        assert_eq!(retried.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_salt_separates_entries() {
        let cache = memory::<i32>().with_default_salt("tenant-a");
        let tree = active_products(true);

        let a = cache
            .materialize_with_outcome(PLAN, &tree, None, || async { Ok::<_, Error>(Some(1)) })
            .await
            .unwrap();
        let b = cache
            .materialize_with_outcome(PLAN, &tree, Some("tenant-b"), || async { Ok::<_, Error>(Some(2)) })
            .await
            .unwrap();
        assert_eq!(b.outcome, Outcome::Miss);
        assert_ne!(a.key.unwrap().digest(), b.key.unwrap().digest());
    }

    #[tokio::test]
    async fn test_probe_failure_fails_open() {
        let cache: Materializer<i32> = Materializer::new(Arc::new(DownStore));
        let result = cache
            .materialize_with_outcome(PLAN, &active_products(true), None, || async { Ok::<_, Error>(Some(42)) })
            .await
            .unwrap();
        assert_eq!(result.value, Some(42));
        assert_eq!(result.outcome, Outcome::Bypass);
        assert_eq!(cache.stats().snapshot().unavailable, 1);
    }

    #[tokio::test]
    async fn test_insert_failure_still_returns_value() {
        let cache: Materializer<i32> = Materializer::new(Arc::new(ReadOnlyStore));
        let result = cache
            .materialize_with_outcome(PLAN, &active_products(true), None, || async { Ok::<_, Error>(Some(5)) })
            .await
            .unwrap();
        assert_eq!(result.value, Some(5));
        assert_eq!(result.outcome, Outcome::Miss);

        let snap = cache.stats().snapshot();
        assert_eq!((snap.inserts, snap.unavailable), (0, 1));
    }

    #[tokio::test]
    async fn test_disabled_always_computes() {
        let cache = memory::<Vec<String>>().with_enabled(false);
        let calls = AtomicUsize::new(0);
        let tree = active_products(true);

        for _ in 0..3 {
            let result = cache
                .materialize_with_outcome(PLAN, &tree, None, || counted(&calls, Some(rows())))
                .await
                .unwrap();
            assert_eq!(result.outcome, Outcome::Bypass);
            assert!(result.key.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.store().len().await.unwrap(), 0);
    }

    struct FixedPlan;

    impl PlanCompiler for FixedPlan {
        fn compile(&self, _tree: &Expr) -> Result<String, Error> {
            Ok(PLAN.to_string())
        }
    }

    struct BrokenPlan;

    impl PlanCompiler for BrokenPlan {
        fn compile(&self, _tree: &Expr) -> Result<String, Error> {
            Err(Error::PlanFailed("unsupported projection".into()))
        }
    }

    #[tokio::test]
    async fn test_materialize_query() {
        let cache = memory::<Vec<String>>();
        let calls = AtomicUsize::new(0);
        let tree = active_products(true);

        cache.materialize_query(&FixedPlan, &tree, None, || counted(&calls, Some(rows()))).await.unwrap();
        let cached = cache.materialize(PLAN, &tree, None, || counted(&calls, None)).await.unwrap();
        assert_eq!(cached, Some(rows()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let failed = cache.materialize_query(&BrokenPlan, &tree, None, || counted(&calls, None)).await;
        assert!(matches!(failed, Err(Error::PlanFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply_events() {
        let cache = memory::<i32>();
        let book = TypeRef::class("Book");
        let product = TypeRef::class("Product");

        let by_product = Expr::query_root(product);
        let by_book = Expr::query_root(book);
        cache.materialize("p", &by_product, None, || async { Ok::<_, Error>(Some(1)) }).await.unwrap();
        cache.materialize("b", &by_book, None, || async { Ok::<_, Error>(Some(2)) }).await.unwrap();

        let removed = cache.apply(&InvalidationEvent::with_ancestors("Book", ["Product"])).await.unwrap();
        assert_eq!(removed, 2);

        cache.materialize("p", &by_product, None, || async { Ok::<_, Error>(Some(1)) }).await.unwrap();
        assert_eq!(cache.apply(&InvalidationEvent::InvalidateAll).await.unwrap(), 1);
        assert_eq!(cache.store().len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_coalescing_runs_compute_once() {
        let cache = Arc::new(memory::<Vec<String>>().with_coalescing(true));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let tree = active_products(true);
                cache
                    .materialize(PLAN, &tree, None, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, Error>(Some(rows()))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(rows()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[test]
    fn test_flight_slot_removed_when_members_leave_together() {
        let slots = Slots::new();
        for _ in 0..200 {
            let barrier = std::sync::Barrier::new(4);
            std::thread::scope(|scope| {
                for _ in 0..4 {
                    scope.spawn(|| {
                        let flight = Flight::join(&slots, "ABCD1234");
                        barrier.wait();
                        drop(flight);
                    });
                }
            });
            assert!(slots.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cancelled_compute_stores_nothing() {
        let cache = memory::<i32>().with_coalescing(true);
        let tree = active_products(true);

        let pending = cache.materialize(PLAN, &tree, None, || async {
            std::future::pending::<()>().await;
            Ok::<_, Error>(Some(1))
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), pending).await.is_err());

        assert_eq!(cache.store().len().await.unwrap(), 0);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let config = CacheConfig { default_salt: "v1".into(), ..Default::default() };
        let cache: Materializer<i32> = Materializer::from_config(&config).await.unwrap();

        let result = cache
            .materialize_with_outcome(PLAN, &active_products(true), None, || async { Ok::<_, Error>(Some(3)) })
            .await
            .unwrap();
        assert!(result.key.unwrap().canonical_text().ends_with("\nv1"));
    }
}
