//! Prometheus Exposition
//!
//! Mirrors repository metric snapshots and cache statistics into Prometheus
//! gauges on every scrape.

use std::sync::Arc;

use bytes::Bytes;
use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry, Encoder, Gauge, GaugeVec,
    Registry, TextEncoder,
};

use super::registry::MetricsRegistry;
use crate::cache::CacheStore;
use crate::error::{Error, Result};

const ENTITY_LABEL: &[&str] = &["entity_type"];

pub struct MetricsExporter {
    registry: Registry,
    metrics: MetricsRegistry,
    cache: Option<Arc<CacheStore<Bytes>>>,

    operations: GaugeVec,
    errors: GaugeVec,
    error_rate: GaugeVec,
    slow_queries: GaugeVec,
    avg_operation_ms: GaugeVec,
    memory_mb: GaugeVec,

    cache_entries: Gauge,
    cache_hits: Gauge,
    cache_misses: Gauge,
    cache_evictions: Gauge,
}

fn registration(name: &str) -> impl FnOnce(prometheus::Error) -> Error + '_ {
    move |e| Error::Internal(format!("Failed to register {}: {}", name, e))
}

impl MetricsExporter {
    /// Create an exporter with its own Prometheus registry.
    pub fn new(metrics: MetricsRegistry, cache: Option<Arc<CacheStore<Bytes>>>) -> Result<Self> {
        let registry = Registry::new();

        Ok(Self {
            operations: register_gauge_vec_with_registry!(
                "axai_repository_operations",
                "Operations recorded per entity type",
                ENTITY_LABEL,
                registry
            )
            .map_err(registration("axai_repository_operations"))?,

            errors: register_gauge_vec_with_registry!(
                "axai_repository_errors",
                "Failed operations per entity type",
                ENTITY_LABEL,
                registry
            )
            .map_err(registration("axai_repository_errors"))?,

            error_rate: register_gauge_vec_with_registry!(
                "axai_repository_error_rate",
                "Failed operations as a fraction of all operations",
                ENTITY_LABEL,
                registry
            )
            .map_err(registration("axai_repository_error_rate"))?,

            slow_queries: register_gauge_vec_with_registry!(
                "axai_repository_slow_queries",
                "Operations slower than the profile threshold",
                ENTITY_LABEL,
                registry
            )
            .map_err(registration("axai_repository_slow_queries"))?,

            avg_operation_ms: register_gauge_vec_with_registry!(
                "axai_repository_avg_operation_ms",
                "Running mean operation latency in milliseconds",
                ENTITY_LABEL,
                registry
            )
            .map_err(registration("axai_repository_avg_operation_ms"))?,

            memory_mb: register_gauge_vec_with_registry!(
                "axai_repository_memory_mb",
                "Latest process memory sample in MB",
                ENTITY_LABEL,
                registry
            )
            .map_err(registration("axai_repository_memory_mb"))?,

            cache_entries: register_gauge_with_registry!(
                "axai_cache_entries",
                "Entries currently held by the query cache",
                registry
            )
            .map_err(registration("axai_cache_entries"))?,

            cache_hits: register_gauge_with_registry!(
                "axai_cache_hits",
                "Query cache hits since start",
                registry
            )
            .map_err(registration("axai_cache_hits"))?,

            cache_misses: register_gauge_with_registry!(
                "axai_cache_misses",
                "Query cache misses since start",
                registry
            )
            .map_err(registration("axai_cache_misses"))?,

            cache_evictions: register_gauge_with_registry!(
                "axai_cache_evictions",
                "Entries evicted for capacity since start",
                registry
            )
            .map_err(registration("axai_cache_evictions"))?,

            registry,
            metrics,
            cache,
        })
    }

    /// Copy current snapshots into the gauges.
    pub fn refresh(&self) {
        for (entity_type, snapshot) in self.metrics.snapshot_all() {
            let labels = [entity_type.as_str()];
            let set = |gauge: &GaugeVec, value: Option<f64>| {
                if let Some(value) = value {
                    gauge.with_label_values(&labels).set(value);
                }
            };

            set(&self.operations, snapshot.operation_count.map(|v| v as f64));
            set(&self.errors, snapshot.error_count.map(|v| v as f64));
            set(&self.error_rate, snapshot.error_rate);
            set(&self.slow_queries, snapshot.slow_query_count.map(|v| v as f64));
            set(&self.avg_operation_ms, snapshot.avg_operation_time_ms);
            set(&self.memory_mb, snapshot.current_memory_mb);
        }

        if let Some(cache) = &self.cache {
            let stats = cache.stats();
            self.cache_entries.set(stats.entries as f64);
            self.cache_hits.set(stats.hits as f64);
            self.cache_misses.set(stats.misses as f64);
            self.cache_evictions.set(stats.evictions as f64);
        }
    }

    /// Refresh and encode in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        self.refresh();

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics output is not UTF-8: {}", e)))
    }

    pub fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4; charset=utf-8"
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;
    use crate::metrics::{RepositoryMetrics, RepositoryMetricsConfig};
    use std::time::Duration;

    #[test]
    fn test_render_includes_entity_and_cache_gauges() {
        let metrics = MetricsRegistry::new();
        metrics.insert(
            EntityType::document(),
            RepositoryMetrics::new(RepositoryMetricsConfig::standard()).unwrap(),
        );
        metrics
            .get(&EntityType::document())
            .unwrap()
            .record_operation(12.0, true, None);

        let cache = Arc::new(CacheStore::with_limits(10, Duration::from_secs(60)).unwrap());
        cache.set("document:find_by_id:x", Bytes::from_static(b"null"));
        cache.get("document:find_by_id:x");

        let exporter = MetricsExporter::new(metrics, Some(cache)).unwrap();
        let text = exporter.render().unwrap();

        assert!(text.contains("axai_repository_operations{entity_type=\"document\"} 1"));
        assert!(text.contains("axai_repository_errors{entity_type=\"document\"} 1"));
        assert!(text.contains("axai_repository_avg_operation_ms{entity_type=\"document\"} 12"));
        assert!(text.contains("axai_cache_entries 1"));
        assert!(text.contains("axai_cache_hits 1"));
    }

    #[test]
    fn test_minimal_profile_skips_timing_gauges() {
        let metrics = MetricsRegistry::new();
        metrics.insert(
            EntityType::user(),
            RepositoryMetrics::new(RepositoryMetricsConfig::minimal()).unwrap(),
        );

        let exporter = MetricsExporter::new(metrics, None).unwrap();
        let text = exporter.render().unwrap();

        assert!(text.contains("axai_repository_operations{entity_type=\"user\"} 0"));
        assert!(!text.contains("axai_repository_avg_operation_ms{"));
    }
}
