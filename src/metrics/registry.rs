//! Metrics Registry
//!
//! Entity type → `RepositoryMetrics` map shared between the factory and the
//! instrumented repositories it hands out. Cloning the registry is cheap and
//! every clone sees the same instances.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::debug;

use super::repository::{MetricsSnapshot, RepositoryMetrics};
use crate::domain::EntityType;
use crate::error::{Error, Result};

#[derive(Clone, Default)]
pub struct MetricsRegistry {
    instances: Arc<DashMap<EntityType, Arc<RepositoryMetrics>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the instance for `entity_type`.
    pub fn insert(&self, entity_type: EntityType, metrics: RepositoryMetrics) {
        self.instances.insert(entity_type, Arc::new(metrics));
    }

    pub fn get(&self, entity_type: &EntityType) -> Result<Arc<RepositoryMetrics>> {
        self.instances
            .get(entity_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::not_registered(entity_type))
    }

    pub fn contains(&self, entity_type: &EntityType) -> bool {
        self.instances.contains_key(entity_type)
    }

    pub fn snapshot(&self, entity_type: &EntityType) -> Result<MetricsSnapshot> {
        Ok(self.get(entity_type)?.get_metrics())
    }

    /// Snapshots of every registered entity type.
    pub fn snapshot_all(&self) -> BTreeMap<EntityType, MetricsSnapshot> {
        self.instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get_metrics()))
            .collect()
    }

    pub fn reset_all(&self) {
        for entry in self.instances.iter() {
            entry.value().reset();
        }
    }

    /// Start timing an operation. The guard records on drop.
    ///
    /// Unknown entity types get a guard that records nothing.
    pub fn begin_operation(&self, entity_type: &EntityType) -> OperationGuard {
        let metrics = self.instances.get(entity_type).map(|e| Arc::clone(e.value()));
        if metrics.is_none() {
            debug!(entity_type = %entity_type, "No metrics registered, operation not recorded");
        }
        OperationGuard {
            metrics,
            started: Instant::now(),
            failed: false,
        }
    }

    /// Run `fut` and record it as one operation.
    ///
    /// If the future is dropped before completing, the operation is recorded
    /// as an error.
    pub async fn track<T, Fut>(&self, entity_type: &EntityType, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let mut guard = self.begin_operation(entity_type);
        guard.set_failed(true);
        guard.finish(fut.await)
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("entity_types", &self.instances.len())
            .finish()
    }
}

/// Records exactly one operation when dropped.
///
/// The error flag is whatever was last set, or `true` if the thread is
/// unwinding from a panic.
#[must_use = "the operation is recorded when the guard is dropped"]
pub struct OperationGuard {
    metrics: Option<Arc<RepositoryMetrics>>,
    started: Instant,
    failed: bool,
}

impl OperationGuard {
    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Set the error flag from `result` and pass it through.
    pub fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        self.failed = result.is_err();
        result
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if let Some(metrics) = &self.metrics {
            let error = self.failed || std::thread::panicking();
            metrics.record_operation(self.elapsed_ms(), error, None);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
