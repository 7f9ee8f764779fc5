//! Caching Repository Decorator
//!
//! Reads are served from the shared query cache when a live entry exists;
//! otherwise the inner repository is called and its result stored under a
//! key derived from the method name and arguments.
//!
//! ```text
//!   read(args) ──▶ derive_key ──▶ lookup ──hit──▶ decode ──▶ return
//!                                   │ miss / fault
//!                                   ▼
//!                             inner.read(args) ──▶ store (unless a write
//!                                                  raced it) ──▶ return
//!
//!   write(args) ──▶ inner.write(args) ──▶ drop: evict "{entity}:" families
//!                                             of written types + dependents
//! ```
//!
//! Cache faults (key derivation, lookup, decode, store, evict) are logged and
//! the call carries on uncached. Eviction runs from a drop guard, so a write
//! future cancelled after reaching the store still invalidates.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::traits::{DocumentQueries, Repository};
use crate::cache::{derive_key, entity_prefix, QueryCache};
use crate::domain::{
    EntityType, Fields, Filter, QueryOptions, Record, RecordId, WriteOp, WriteOutcome,
};
use crate::error::Result;

const MINUTE: Duration = Duration::from_secs(60);

/// Which entity families hold cached reads derived from another entity.
///
/// One map is shared by every cached repository, so a write through any of
/// them evicts the dependents of every type it touched.
#[derive(Debug, Clone, Default)]
pub struct CacheDependencies {
    dependents: HashMap<EntityType, Vec<EntityType>>,
}

impl CacheDependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached `dependent` reads go stale when `source` is written.
    pub fn with(mut self, source: EntityType, dependent: EntityType) -> Self {
        let entry = self.dependents.entry(source).or_default();
        if !entry.contains(&dependent) {
            entry.push(dependent);
        }
        self
    }

    pub fn dependents_of(&self, source: &EntityType) -> &[EntityType] {
        self.dependents
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `written` plus everything transitively depending on it.
    pub fn expand<'a>(&self, written: impl IntoIterator<Item = &'a EntityType>) -> BTreeSet<EntityType> {
        let mut families = BTreeSet::new();
        let mut pending: Vec<EntityType> = written.into_iter().cloned().collect();
        while let Some(entity_type) = pending.pop() {
            if families.insert(entity_type.clone()) {
                pending.extend(self.dependents_of(&entity_type).iter().cloned());
            }
        }
        families
    }
}

/// TTLs and invalidation scope for one cached repository.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub default_ttl: Duration,
    /// Per-method overrides of `default_ttl`
    pub method_ttls: HashMap<&'static str, Duration>,
    pub dependencies: Arc<CacheDependencies>,
}

impl CachePolicy {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            method_ttls: HashMap::new(),
            dependencies: Arc::new(CacheDependencies::new()),
        }
    }

    /// Document query TTLs.
    pub fn documents(default_ttl: Duration) -> Self {
        Self::new(default_ttl)
            .with_ttl("find_by_organization", 15 * MINUTE)
            .with_ttl("find_by_owner", 15 * MINUTE)
            .with_ttl("find_by_status", 15 * MINUTE)
            .with_ttl("find_by_topic", 30 * MINUTE)
            .with_ttl("find_related_documents", 30 * MINUTE)
            .with_ttl("search", 5 * MINUTE)
    }

    pub fn with_ttl(mut self, method: &'static str, ttl: Duration) -> Self {
        self.method_ttls.insert(method, ttl);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Arc<CacheDependencies>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn ttl_for(&self, method: &str) -> Duration {
        self.method_ttls
            .get(method)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

pub struct CachedRepository<R> {
    inner: R,
    cache: Arc<dyn QueryCache>,
    policy: CachePolicy,
    /// Bumped around every write; a read only stores its result if no write
    /// started or finished while it was loading.
    write_epoch: AtomicU64,
}

impl<R: Repository> CachedRepository<R> {
    pub fn new(inner: R, cache: Arc<dyn QueryCache>, policy: CachePolicy) -> Self {
        Self {
            inner,
            cache,
            policy,
            write_epoch: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    async fn cached<A, T, F, Fut>(&self, method: &'static str, args: &A, load: F) -> Result<T>
    where
        A: Serialize + Sync + ?Sized,
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let entity_type = self.inner.entity_type();
        let key = match derive_key(entity_type, method, args) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(entity_type = %entity_type, method, error = %e, "Cache key derivation failed");
                None
            }
        };

        if let Some(key) = &key {
            match self.cache.lookup(key) {
                Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                    Ok(value) => {
                        debug!(key = %key, "Cache hit");
                        return Ok(value);
                    }
                    Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
                },
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Cache lookup failed"),
            }
        }

        let epoch = self.write_epoch.load(Ordering::Acquire);
        let value = load().await?;

        if let Some(key) = key {
            if self.write_epoch.load(Ordering::Acquire) != epoch {
                debug!(key = %key, "Write raced this read, not caching");
                return Ok(value);
            }
            match serde_json::to_vec(&value) {
                Ok(bytes) => {
                    if let Err(e) = self.cache.store(&key, Bytes::from(bytes), self.policy.ttl_for(method)) {
                        warn!(key = %key, error = %e, "Cache store failed");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Cache encode failed"),
            }
        }

        Ok(value)
    }

    /// Invalidation guard for a write touching `extra` entity types.
    fn invalidation<'a>(&'a self, extra: impl IntoIterator<Item = &'a EntityType>) -> Invalidation<'a> {
        let written = std::iter::once(self.inner.entity_type()).chain(extra);
        let families = self.policy.dependencies.expand(written);

        self.write_epoch.fetch_add(1, Ordering::AcqRel);
        Invalidation {
            cache: self.cache.as_ref(),
            epoch: &self.write_epoch,
            prefixes: families.iter().map(entity_prefix).collect(),
        }
    }
}

/// Evicts cached families when dropped.
struct Invalidation<'a> {
    cache: &'a dyn QueryCache,
    epoch: &'a AtomicU64,
    prefixes: Vec<String>,
}

impl Drop for Invalidation<'_> {
    fn drop(&mut self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        for prefix in &self.prefixes {
            if let Err(e) = self.cache.evict_prefix(prefix) {
                warn!(prefix = %prefix, error = %e, "Cache invalidation failed");
            }
        }
    }
}

#[async_trait]
impl<R: Repository> Repository for CachedRepository<R> {
    fn entity_type(&self) -> &EntityType {
        self.inner.entity_type()
    }

    async fn find_by_id(&self, id: RecordId) -> Result<Option<Record>> {
        self.cached("find_by_id", &(id,), || self.inner.find_by_id(id))
            .await
    }

    async fn find_many(&self, filter: &Filter, options: &QueryOptions) -> Result<Vec<Record>> {
        self.cached("find_many", &(filter, options), || {
            self.inner.find_many(filter, options)
        })
        .await
    }

    async fn create(&self, fields: Fields) -> Result<Record> {
        let _invalidate = self.invalidation([]);
        self.inner.create(fields).await
    }

    async fn update(&self, id: RecordId, fields: Fields) -> Result<Option<Record>> {
        let _invalidate = self.invalidation([]);
        self.inner.update(id, fields).await
    }

    async fn delete(&self, id: RecordId) -> Result<bool> {
        let _invalidate = self.invalidation([]);
        self.inner.delete(id).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<Vec<WriteOutcome>> {
        let touched: Vec<EntityType> = ops.iter().map(|op| op.entity_type().clone()).collect();
        let _invalidate = self.invalidation(touched.iter());
        self.inner.transaction(ops).await
    }
}

#[async_trait]
impl<R: DocumentQueries> DocumentQueries for CachedRepository<R> {
    async fn find_by_organization(
        &self,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.cached("find_by_organization", &(org_id, options), || {
            self.inner.find_by_organization(org_id, options)
        })
        .await
    }

    async fn find_by_owner(
        &self,
        owner_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.cached("find_by_owner", &(owner_id, options), || {
            self.inner.find_by_owner(owner_id, options)
        })
        .await
    }

    async fn find_by_topic(
        &self,
        topic_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.cached("find_by_topic", &(topic_id, options), || {
            self.inner.find_by_topic(topic_id, options)
        })
        .await
    }

    async fn find_related_documents(
        &self,
        document_id: RecordId,
        max_depth: usize,
    ) -> Result<Vec<Record>> {
        self.cached("find_related_documents", &(document_id, max_depth), || {
            self.inner.find_related_documents(document_id, max_depth)
        })
        .await
    }

    async fn search(
        &self,
        query: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.cached("search", &(query, org_id, options), || {
            self.inner.search(query, org_id, options)
        })
        .await
    }

    async fn find_by_status(
        &self,
        status: &str,
        org_id: RecordId,
        options: &QueryOptions,
    ) -> Result<Vec<Record>> {
        self.cached("find_by_status", &(status, org_id, options), || {
            self.inner.find_by_status(status, org_id, options)
        })
        .await
    }

    async fn create_with_summary(
        &self,
        document: Fields,
        summary: Fields,
    ) -> Result<(Record, Record)> {
        let summary_type = EntityType::summary();
        let _invalidate = self.invalidation([&summary_type]);
        self.inner.create_with_summary(document, summary).await
    }

    async fn update_with_version(
        &self,
        id: RecordId,
        changes: Fields,
        change_description: Option<&str>,
    ) -> Result<Record> {
        let version_type = EntityType::document_version();
        let _invalidate = self.invalidation([&version_type]);
        self.inner
            .update_with_version(id, changes, change_description)
            .await
    }
}

// =============================================================================
// Tests
// =============================================================================
