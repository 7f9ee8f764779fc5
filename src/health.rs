//! Health Checks
//!
//! Liveness and readiness reporting for the data-access layer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheStore;
use crate::database::DatabaseManager;
use crate::domain::Persistence;

/// Outcome of a check, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Serving, but a dependency is under pressure (e.g. a full cache)
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Whether traffic should still be routed here.
    pub fn is_serving(self) -> bool {
        self != HealthStatus::Unhealthy
    }

    pub fn is_healthy(self) -> bool {
        self == HealthStatus::Healthy
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single named check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

impl HealthCheckResult {
    fn with_status(name: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message,
            duration_ms: 0,
            details: BTreeMap::new(),
        }
    }

    pub fn healthy(name: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Healthy, None)
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Unhealthy, Some(message.into()))
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Worst status among the checks
    pub status: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub version: String,
    pub uptime_seconds: u64,
}

impl HealthResponse {
    pub fn new(checks: Vec<HealthCheckResult>, uptime: Duration) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime.as_secs(),
        }
    }
}

/// Aggregates the database and cache checks.
pub struct HealthCheck {
    start_time: Instant,
    ready: AtomicBool,
    store: Arc<dyn Persistence>,
    database: Option<Arc<DatabaseManager>>,
    cache: Option<Arc<CacheStore<Bytes>>>,
}

impl HealthCheck {
    pub fn new(store: Arc<dyn Persistence>) -> Self {
        Self {
            start_time: Instant::now(),
            ready: AtomicBool::new(false),
            store,
            database: None,
            cache: None,
        }
    }

    /// Use the pool manager's check, which also reports pool occupancy.
    pub fn with_database(mut self, database: Arc<DatabaseManager>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_cache(mut self, cache: Arc<CacheStore<Bytes>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Process liveness only; touches no dependencies.
    pub fn liveness(&self) -> HealthResponse {
        HealthResponse::new(vec![HealthCheckResult::healthy("liveness")], self.uptime())
    }

    pub async fn check_database(&self) -> HealthCheckResult {
        if let Some(database) = &self.database {
            return database.check_health().await;
        }

        let started = Instant::now();
        let result = match self.store.health_check().await {
            Ok(true) => HealthCheckResult::healthy("database"),
            Ok(false) => HealthCheckResult::unhealthy("database", "store unreachable"),
            Err(e) => HealthCheckResult::unhealthy("database", e.to_string()),
        };
        result.with_duration(started.elapsed())
    }

    /// Degraded when the cache is full, since every insert then evicts.
    pub fn check_cache(&self) -> Option<HealthCheckResult> {
        let cache = self.cache.as_ref()?;
        let stats = cache.stats();
        let result = if stats.entries >= stats.max_size {
            HealthCheckResult::degraded("cache", "cache at capacity")
        } else {
            HealthCheckResult::healthy("cache")
        };
        Some(
            result
                .with_detail("entries", stats.entries as u64)
                .with_detail("max_size", stats.max_size as u64)
                .with_detail("hit_ratio", stats.hit_ratio()),
        )
    }

    /// Readiness: the ready flag plus every dependency check.
    pub async fn readiness(&self) -> HealthResponse {
        let mut checks = vec![if self.is_ready() {
            HealthCheckResult::healthy("readiness")
        } else {
            HealthCheckResult::unhealthy("readiness", "not ready")
        }];
        checks.push(self.check_database().await);
        checks.extend(self.check_cache());
        HealthResponse::new(checks, self.uptime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryStore;

    #[test]
    fn test_overall_status_is_worst() {
        let response = HealthResponse::new(
            vec![
                HealthCheckResult::healthy("a"),
                HealthCheckResult::degraded("b", "slow"),
            ],
            Duration::from_secs(5),
        );
        assert_eq!(response.status, HealthStatus::Degraded);
        assert!(response.status.is_serving());
        assert_eq!(response.uptime_seconds, 5);

        let empty = HealthResponse::new(vec![], Duration::ZERO);
        assert!(empty.status.is_healthy());
    }

    #[tokio::test]
    async fn test_readiness_follows_store() {
        let store = Arc::new(InMemoryStore::new());
        let health = HealthCheck::new(store.clone());

        assert_eq!(health.readiness().await.status, HealthStatus::Unhealthy);
        health.set_ready(true);
        assert_eq!(health.readiness().await.status, HealthStatus::Healthy);

        store.set_unavailable(true);
        let response = health.readiness().await;
        assert_eq!(response.status, HealthStatus::Unhealthy);
        assert_eq!(response.checks[1].name, "database");
        assert_eq!(health.liveness().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_full_cache_is_degraded() {
        let cache = Arc::new(CacheStore::with_limits(1, Duration::from_secs(60)).unwrap());
        let health = HealthCheck::new(Arc::new(InMemoryStore::new())).with_cache(cache.clone());
        health.set_ready(true);

        assert!(health.check_cache().unwrap().status.is_healthy());
        cache.set("k", Bytes::from_static(b"v"));
        let response = health.readiness().await;
        assert_eq!(response.status, HealthStatus::Degraded);
    }

    #[test]
    fn test_serializes_details() {
        let result = HealthCheckResult::healthy("cache").with_detail("entries", 3u64);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["details"]["entries"], 3);
        assert_eq!(json["status"], "healthy");
        let bare = serde_json::to_value(HealthCheckResult::healthy("x")).unwrap();
        assert!(bare.get("details").is_none());
    }
}
