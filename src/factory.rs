//! Repository Factory
//!
//! Thread-safe registry of repositories and their metrics, keyed by entity
//! type.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     RepositoryFactory                         │
//! │                                                               │
//! │  repositories: entity_type ──▶ RepositoryHandle               │
//! │  metrics:      entity_type ──▶ RepositoryMetrics  (registry)  │
//! │  configs:      entity_type ──▶ RepositoryMetricsConfig        │
//! └──────────────────────────────────────────────────────────────┘
//!           │                                   ▲
//!           │ repository_session()              │ OperationGuard::drop
//!           ▼                                   │
//!     RepositorySession ─────── caller's work ──┘
//! ```
//!
//! The three maps are independent `DashMap`s, so registering a new entity
//! type never blocks metric recording for existing ones.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::cache::{DisabledCache, QueryCache};
use crate::config::CacheConfig;
use crate::domain::{EntityType, Persistence};
use crate::error::{Error, Result};
use crate::metrics::{
    MetricsRegistry, MetricsSnapshot, OperationGuard, RepositoryMetrics, RepositoryMetricsConfig,
};
use crate::repository::{
    BaseRepository, CacheDependencies, CachePolicy, CachedRepository, DocumentQueries,
    DocumentRepository, InstrumentedRepository, Repository, RepositoryHandle,
};

static INSTANCE: OnceCell<Arc<RepositoryFactory>> = OnceCell::new();

/// Entity types registered by `register_defaults` as plain CRUD repositories.
pub fn standard_entity_types() -> Vec<EntityType> {
    vec![
        EntityType::organization(),
        EntityType::user(),
        EntityType::document_version(),
        EntityType::summary(),
        EntityType::topic(),
        EntityType::document_topic(),
        EntityType::graph_entity(),
        EntityType::graph_relationship(),
        EntityType::collection(),
        EntityType::security_role(),
    ]
}

pub struct RepositoryFactory {
    repositories: DashMap<EntityType, RepositoryHandle>,
    metrics: MetricsRegistry,
    configs: DashMap<EntityType, RepositoryMetricsConfig>,
    default_config: RepositoryMetricsConfig,
}

impl Default for RepositoryFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl RepositoryFactory {
    /// Create an empty factory whose default metrics profile is minimal.
    pub fn new() -> Self {
        Self::with_default_metrics(RepositoryMetricsConfig::minimal())
    }

    pub fn with_default_metrics(default_config: RepositoryMetricsConfig) -> Self {
        Self {
            repositories: DashMap::new(),
            metrics: MetricsRegistry::new(),
            configs: DashMap::new(),
            default_config,
        }
    }

    /// Process-wide instance, created on first use.
    ///
    /// Concurrent first calls race safely; exactly one instance is built.
    pub fn get_instance() -> Arc<RepositoryFactory> {
        Arc::clone(INSTANCE.get_or_init(|| Arc::new(RepositoryFactory::new())))
    }

    /// Install a configured factory as the process-wide instance.
    ///
    /// Fails if `get_instance` or `install` already ran.
    pub fn install(factory: Arc<RepositoryFactory>) -> Result<Arc<RepositoryFactory>> {
        INSTANCE
            .set(Arc::clone(&factory))
            .map_err(|_| Error::Configuration("repository factory already initialized".into()))?;
        Ok(factory)
    }

    /// Shared handle to the metrics instances, for instrumented repositories.
    pub fn metrics_registry(&self) -> MetricsRegistry {
        self.metrics.clone()
    }

    pub fn default_metrics_config(&self) -> &RepositoryMetricsConfig {
        &self.default_config
    }

    /// Install or replace the repository for `entity_type` with fresh metrics.
    pub fn register_repository(
        &self,
        entity_type: EntityType,
        repository: RepositoryHandle,
        config: Option<RepositoryMetricsConfig>,
    ) -> Result<()> {
        let config = config.unwrap_or_else(|| self.default_config.clone());
        let metrics = RepositoryMetrics::new(config.clone())?;

        self.metrics.insert(entity_type.clone(), metrics);
        self.configs.insert(entity_type.clone(), config);
        self.repositories.insert(entity_type.clone(), repository);

        info!(entity_type = %entity_type, "Registered repository");
        Ok(())
    }

    pub fn get_repository(&self, entity_type: &EntityType) -> Result<RepositoryHandle> {
        self.repositories
            .get(entity_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_registered(entity_type))
    }

    /// Document queries for `entity_type`.
    pub fn get_document_repository(
        &self,
        entity_type: &EntityType,
    ) -> Result<Arc<dyn DocumentQueries>> {
        self.get_repository(entity_type)?
            .documents()
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "{} repository does not support document queries",
                    entity_type
                ))
            })
    }

    pub fn get_metrics(&self, entity_type: &EntityType) -> Result<MetricsSnapshot> {
        self.metrics.snapshot(entity_type)
    }

    pub fn get_metrics_config(&self, entity_type: &EntityType) -> Result<RepositoryMetricsConfig> {
        self.configs
            .get(entity_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_registered(entity_type))
    }

    /// Replace the metrics instance for a registered type, dropping its counters.
    pub fn configure_metrics(
        &self,
        entity_type: &EntityType,
        config: RepositoryMetricsConfig,
    ) -> Result<()> {
        if !self.repositories.contains_key(entity_type) {
            return Err(Error::not_registered(entity_type));
        }

        let metrics = RepositoryMetrics::new(config.clone())?;
        self.configs.insert(entity_type.clone(), config);
        self.metrics.insert(entity_type.clone(), metrics);

        debug!(entity_type = %entity_type, "Reconfigured repository metrics");
        Ok(())
    }

    /// Reset one entity's metrics, or every entity's when `None`.
    pub fn reset_metrics(&self, entity_type: Option<&EntityType>) -> Result<()> {
        match entity_type {
            Some(entity_type) => self.metrics.get(entity_type)?.reset(),
            None => self.metrics.reset_all(),
        }
        Ok(())
    }

    pub fn registered_types(&self) -> Vec<EntityType> {
        let mut types: Vec<EntityType> =
            self.repositories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn all_metrics(&self) -> BTreeMap<EntityType, MetricsSnapshot> {
        self.metrics.snapshot_all()
    }

    /// Start timing one operation against `entity_type`.
    pub fn begin_operation(&self, entity_type: &EntityType) -> OperationGuard {
        self.metrics.begin_operation(entity_type)
    }

    /// Scoped access to a repository that records one operation on drop.
    ///
    /// The error flag is set with `RepositorySession::mark_failed` or by
    /// passing the outcome through `RepositorySession::finish`; a panic
    /// inside the scope also counts as an error.
    pub fn repository_session(&self, entity_type: &EntityType) -> Result<RepositorySession> {
        let handle = self.get_repository(entity_type)?;
        let guard = self.metrics.begin_operation(entity_type);
        Ok(RepositorySession { handle, guard })
    }

    /// Run `f` inside a repository session.
    ///
    /// The error flag follows the returned result. If the future is dropped
    /// before completing, the operation is recorded as an error.
    pub async fn with_session<T, F, Fut>(&self, entity_type: &EntityType, f: F) -> Result<T>
    where
        F: FnOnce(RepositoryHandle) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut session = self.repository_session(entity_type)?;
        session.mark_failed();
        let result = f(session.handle.clone()).await;
        session.finish(result)
    }

    /// Register the document repository and the standard entity types,
    /// each wrapped as `Instrumented(Cached(base))`.
    ///
    /// With caching disabled the cached layer always misses.
    pub fn register_defaults(
        &self,
        store: Arc<dyn Persistence>,
        cache: Option<Arc<dyn QueryCache>>,
        cache_config: &CacheConfig,
    ) -> Result<()> {
        let cache: Arc<dyn QueryCache> = match cache {
            Some(cache) if cache_config.enabled => cache,
            _ => Arc::new(DisabledCache),
        };
        let default_ttl = cache_config.default_ttl()?;

        // Topic links and graph edges feed cached document queries
        let dependencies = Arc::new(
            CacheDependencies::new()
                .with(EntityType::document_topic(), EntityType::document())
                .with(EntityType::graph_relationship(), EntityType::document()),
        );

        let document = EntityType::document();
        let policy = CachePolicy::documents(default_ttl).with_dependencies(Arc::clone(&dependencies));
        let repository = InstrumentedRepository::new(
            CachedRepository::new(DocumentRepository::new(Arc::clone(&store)), Arc::clone(&cache), policy),
            self.metrics_registry(),
        );
        self.register_repository(document, RepositoryHandle::document(repository), None)?;

        for entity_type in standard_entity_types() {
            let policy = CachePolicy::new(default_ttl).with_dependencies(Arc::clone(&dependencies));
            let repository = InstrumentedRepository::new(
                CachedRepository::new(
                    BaseRepository::new(entity_type.clone(), Arc::clone(&store)),
                    Arc::clone(&cache),
                    policy,
                ),
                self.metrics_registry(),
            );
            self.register_repository(entity_type, RepositoryHandle::new(repository), None)?;
        }

        Ok(())
    }
}

impl std::fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("registered", &self.registered_types())
            .field("default_config", &self.default_config)
            .finish()
    }
}

/// Repository handle plus the pending metrics record for its scope.
pub struct RepositorySession {
    handle: RepositoryHandle,
    guard: OperationGuard,
}

impl RepositorySession {
    pub fn repository(&self) -> &Arc<dyn Repository> {
        self.handle.repository()
    }

    pub fn documents(&self) -> Option<&Arc<dyn DocumentQueries>> {
        self.handle.documents()
    }

    pub fn handle(&self) -> &RepositoryHandle {
        &self.handle
    }

    pub fn mark_failed(&mut self) {
        self.guard.mark_failed();
    }

    /// Set the error flag from `result`, end the session and pass `result` through.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.guard.set_failed(result.is_err());
        result
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;
    use assert_matches::assert_matches;

    fn factory_with_document() -> RepositoryFactory {
        let factory = RepositoryFactory::with_default_metrics(RepositoryMetricsConfig::standard());
        let store: Arc<dyn Persistence> = Arc::new(InMemoryStore::new());
        factory
            .register_repository(
                EntityType::document(),
                RepositoryHandle::document(DocumentRepository::new(store)),
                None,
            )
            .unwrap();
        factory
    }

    #[test]
    fn test_not_registered() {
        let factory = RepositoryFactory::new();
        let missing = EntityType::new("widget");

        assert_matches!(factory.get_repository(&missing), Err(Error::NotRegistered { .. }));
        assert_matches!(factory.get_metrics(&missing), Err(Error::NotRegistered { .. }));
        assert_matches!(
            factory.configure_metrics(&missing, RepositoryMetricsConfig::full()),
            Err(Error::NotRegistered { .. })
        );
        assert_matches!(
            factory.reset_metrics(Some(&missing)),
            Err(Error::NotRegistered { .. })
        );
        assert!(factory.repository_session(&missing).is_err());
    }

    #[test]
    fn test_default_profile_is_minimal() {
        let factory = RepositoryFactory::new();
        let store: Arc<dyn Persistence> = Arc::new(InMemoryStore::new());
        factory
            .register_repository(
                EntityType::user(),
                RepositoryHandle::new(BaseRepository::new(EntityType::user(), store)),
                None,
            )
            .unwrap();

        assert_eq!(
            factory.get_metrics_config(&EntityType::user()).unwrap(),
            RepositoryMetricsConfig::minimal()
        );
        assert_eq!(factory.get_metrics(&EntityType::user()).unwrap().avg_operation_time_ms, None);
    }

    #[test]
    fn test_session_records_on_every_exit_path() {
        let factory = factory_with_document();
        let document = EntityType::document();

        {
            let session = factory.repository_session(&document).unwrap();
            assert!(session.documents().is_some());
        }
        {
            let mut session = factory.repository_session(&document).unwrap();
            session.mark_failed();
        }
        let failed: Result<()> = factory
            .repository_session(&document)
            .unwrap()
            .finish(Err(Error::Persistence("down".into())));
        assert!(failed.is_err());

        let snap = factory.get_metrics(&document).unwrap();
        assert_eq!(snap.operation_count, Some(3));
        assert_eq!(snap.error_count, Some(2));
    }

    #[test]
    fn test_configure_metrics_replaces_counters() {
        let factory = factory_with_document();
        let document = EntityType::document();
        drop(factory.repository_session(&document).unwrap());

        factory
            .configure_metrics(&document, RepositoryMetricsConfig::full())
            .unwrap();
        let snap = factory.get_metrics(&document).unwrap();
        assert_eq!(snap.operation_count, Some(0));
        assert!(snap.current_memory_mb.is_some());
        assert_eq!(
            factory.get_metrics_config(&document).unwrap(),
            RepositoryMetricsConfig::full()
        );
    }

    #[test]
    fn test_reset_all_metrics() {
        let factory = factory_with_document();
        drop(factory.begin_operation(&EntityType::document()));
        factory.reset_metrics(None).unwrap();
        assert_eq!(
            factory.get_metrics(&EntityType::document()).unwrap().operation_count,
            Some(0)
        );
    }

    #[test]
    fn test_register_rejects_invalid_profile() {
        let factory = RepositoryFactory::new();
        let mut config = RepositoryMetricsConfig::full();
        config.profile.memory_sample_rate = 0;
        let store: Arc<dyn Persistence> = Arc::new(InMemoryStore::new());

        let result = factory.register_repository(
            EntityType::user(),
            RepositoryHandle::new(BaseRepository::new(EntityType::user(), store)),
            Some(config),
        );
        assert_matches!(result, Err(Error::Configuration(_)));
        assert!(factory.registered_types().is_empty());
    }

    #[test]
    fn test_get_instance_is_shared() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(RepositoryFactory::get_instance))
            .collect();
        let instances: Vec<Arc<RepositoryFactory>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        for instance in &instances {
            assert!(Arc::ptr_eq(instance, &instances[0]));
        }
        assert!(RepositoryFactory::install(Arc::new(RepositoryFactory::new())).is_err());
    }

    #[tokio::test]
    async fn test_with_session_tracks_result() {
        let factory = factory_with_document();
        let document = EntityType::document();

        let created = factory
            .with_session(&document, |handle| async move {
                let mut fields = crate::domain::Fields::new();
                fields.insert("title".into(), serde_json::json!("Plan"));
                handle.repository().create(fields).await
            })
            .await
            .unwrap();
        assert_eq!(created.get_str("title"), Some("Plan"));

        let missing: Result<crate::domain::Record> = factory
            .with_session(&document, |handle| async move {
                let docs = handle.documents().cloned().ok_or_else(|| Error::Internal("no docs".into()))?;
                docs.update_with_version(crate::domain::RecordId::new(), Default::default(), None)
                    .await
            })
            .await;
        assert_matches!(missing, Err(Error::RecordNotFound { .. }));

        let snap = factory.get_metrics(&document).unwrap();
        assert_eq!(snap.operation_count, Some(2));
        assert_eq!(snap.error_count, Some(1));
    }

    #[tokio::test]
    async fn test_register_defaults() {
        let factory = RepositoryFactory::new();
        let store: Arc<dyn Persistence> = Arc::new(InMemoryStore::new());
        factory
            .register_defaults(store, None, &CacheConfig::default())
            .unwrap();

        assert_eq!(factory.registered_types().len(), standard_entity_types().len() + 1);
        assert!(factory.get_document_repository(&EntityType::document()).is_ok());
        assert!(matches!(
            factory.get_document_repository(&EntityType::user()),
            Err(Error::Configuration(_))
        ));

        let users = factory.get_repository(&EntityType::user()).unwrap();
        users.repository().find_by_id(crate::domain::RecordId::new()).await.unwrap();
        assert_eq!(
            factory.get_metrics(&EntityType::user()).unwrap().operation_count,
            Some(1)
        );
    }
}
