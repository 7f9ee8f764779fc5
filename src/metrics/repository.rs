//! Per-Entity Repository Metrics
//!
//! Thread-safe operation counters for one registered entity type. All
//! counter updates for a single operation happen under one lock, so readers
//! never see the average updated without the count (or the reverse).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::warn;

use super::memory::{MemoryProbe, ProcessMemoryProbe};
use super::profile::RepositoryMetricsConfig;
use crate::error::Result;

/// Memory samples older than this are pruned.
pub const MEMORY_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Default)]
struct MetricsState {
    operation_count: u64,
    error_count: u64,
    slow_query_count: u64,
    avg_operation_time_ms: f64,
    last_operation_time: Option<DateTime<Utc>>,
    memory_samples: BTreeMap<DateTime<Utc>, f64>,
    last_memory_check: Option<DateTime<Utc>>,
}

/// Profile-filtered view of a metrics instance.
///
/// Fields belonging to a disabled profile section are `None` and are left
/// out of the serialized form.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_operation_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_query_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_samples: Option<BTreeMap<DateTime<Utc>, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_memory_check: Option<DateTime<Utc>>,
}

/// Metrics for one entity type.
pub struct RepositoryMetrics {
    config: RepositoryMetricsConfig,
    state: Mutex<MetricsState>,
    probe: Arc<dyn MemoryProbe>,
}

impl std::fmt::Debug for RepositoryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryMetrics")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl RepositoryMetrics {
    /// Create a metrics instance sampling this process's memory.
    pub fn new(config: RepositoryMetricsConfig) -> Result<Self> {
        Self::with_probe(config, Arc::new(ProcessMemoryProbe::new()))
    }

    /// Create a metrics instance with an explicit memory probe.
    pub fn with_probe(config: RepositoryMetricsConfig, probe: Arc<dyn MemoryProbe>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: Mutex::new(MetricsState::default()),
            probe,
        })
    }

    pub fn config(&self) -> &RepositoryMetricsConfig {
        &self.config
    }

    /// Record one finished operation.
    ///
    /// `slow` overrides the profile's threshold check when given. The
    /// operation count is always maintained because the running average
    /// depends on it; the profile only controls whether it is reported.
    pub fn record_operation(&self, duration_ms: f64, error: bool, slow: Option<bool>) {
        if !self.config.enabled {
            return;
        }

        let duration_ms = if duration_ms.is_finite() && duration_ms >= 0.0 {
            duration_ms
        } else {
            warn!(duration_ms, "Discarding invalid operation duration");
            0.0
        };

        let profile = &self.config.profile;
        let sample_due = {
            let mut state = self.state.lock();
            state.operation_count += 1;

            if profile.enable_error_tracking && error {
                state.error_count += 1;
            }

            if profile.enable_timing_stats {
                state.last_operation_time = Some(Utc::now());
                if slow.unwrap_or(duration_ms > profile.slow_threshold_ms()) {
                    state.slow_query_count += 1;
                }
                let n = state.operation_count as f64;
                state.avg_operation_time_ms =
                    (state.avg_operation_time_ms * (n - 1.0) + duration_ms) / n;
            }

            profile.enable_memory_tracking
                && state.operation_count % profile.memory_sample_rate == 0
        };

        if sample_due {
            self.sample_memory();
        }
    }

    fn sample_memory(&self) {
        let Some(usage_mb) = self.probe.resident_mb() else {
            warn!("Process memory unavailable, skipping sample");
            return;
        };

        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(MEMORY_WINDOW_SECS);
        let mut state = self.state.lock();
        state.memory_samples = state.memory_samples.split_off(&cutoff);
        state.memory_samples.insert(now, usage_mb);
        state.last_memory_check = Some(now);
    }

    /// Snapshot of the counters enabled by the profile.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let profile = &self.config.profile;
        let mut snapshot = MetricsSnapshot::default();

        if profile.enable_operation_counting {
            snapshot.operation_count = Some(state.operation_count);
        }

        if profile.enable_error_tracking {
            snapshot.error_count = Some(state.error_count);
            snapshot.error_rate = Some(if state.operation_count > 0 {
                state.error_count as f64 / state.operation_count as f64
            } else {
                0.0
            });
        }

        if profile.enable_timing_stats {
            snapshot.avg_operation_time_ms = Some(state.avg_operation_time_ms);
            snapshot.slow_query_count = Some(state.slow_query_count);
            snapshot.last_operation_time = state.last_operation_time;
        }

        if profile.enable_memory_tracking {
            snapshot.current_memory_mb = Some(
                state
                    .memory_samples
                    .values()
                    .next_back()
                    .copied()
                    .unwrap_or(0.0),
            );
            snapshot.memory_samples = Some(state.memory_samples.clone());
            snapshot.last_memory_check = state.last_memory_check;
        }

        snapshot
    }

    /// Zero every counter and drop memory samples.
    pub fn reset(&self) {
        *self.state.lock() = MetricsState::default();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::memory::StaticMemoryProbe;
    use crate::metrics::profile::MetricsProfile;

    fn metrics(config: RepositoryMetricsConfig) -> RepositoryMetrics {
        RepositoryMetrics::with_probe(config, Arc::new(StaticMemoryProbe(64.0))).unwrap()
    }

    #[test]
    fn test_running_average() {
        let m = metrics(RepositoryMetricsConfig::standard());
        for d in [10.0, 20.0, 30.0] {
            m.record_operation(d, false, None);
        }

        let snap = m.get_metrics();
        assert_eq!(snap.operation_count, Some(3));
        assert_eq!(snap.avg_operation_time_ms, Some(20.0));
        assert!(snap.last_operation_time.is_some());
    }

    #[test]
    fn test_error_rate() {
        let m = metrics(RepositoryMetricsConfig::standard());
        m.record_operation(5.0, true, None);
        for _ in 0..3 {
            m.record_operation(5.0, false, None);
        }

        let snap = m.get_metrics();
        assert_eq!(snap.error_count, Some(1));
        assert_eq!(snap.error_rate, Some(0.25));
    }

    #[test]
    fn test_error_rate_zero_without_operations() {
        let m = metrics(RepositoryMetricsConfig::standard());
        assert_eq!(m.get_metrics().error_rate, Some(0.0));
    }

    #[test]
    fn test_slow_queries_derived_and_overridden() {
        let m = metrics(RepositoryMetricsConfig::standard());
        m.record_operation(999.0, false, None);
        m.record_operation(1000.0, false, None);
        m.record_operation(1500.0, false, None);
        m.record_operation(5.0, false, Some(true));
        m.record_operation(5000.0, false, Some(false));

        assert_eq!(m.get_metrics().slow_query_count, Some(2));
    }

    #[test]
    fn test_minimal_profile_hides_timing() {
        let m = metrics(RepositoryMetricsConfig::minimal());
        m.record_operation(10.0, true, None);

        let snap = m.get_metrics();
        assert_eq!(snap.operation_count, Some(1));
        assert_eq!(snap.error_count, Some(1));
        assert_eq!(snap.avg_operation_time_ms, None);
        assert_eq!(snap.slow_query_count, None);
        assert_eq!(snap.current_memory_mb, None);

        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("avg_operation_time_ms").is_none());
        assert_eq!(json["operation_count"], 1);
    }

    #[test]
    fn test_timing_without_counting_still_averages() {
        let config = RepositoryMetricsConfig {
            enabled: true,
            profile: MetricsProfile {
                enable_operation_counting: false,
                ..MetricsProfile::default()
            },
        };
        let m = metrics(config);
        m.record_operation(10.0, false, None);
        m.record_operation(30.0, false, None);

        let snap = m.get_metrics();
        assert_eq!(snap.operation_count, None);
        assert_eq!(snap.avg_operation_time_ms, Some(20.0));
        assert_eq!(snap.error_rate, Some(0.0));
    }

    #[test]
    fn test_disabled_records_nothing() {
        let m = metrics(RepositoryMetricsConfig::disabled());
        m.record_operation(10.0, true, None);
        assert_eq!(m.get_metrics().operation_count, Some(0));
        assert_eq!(m.get_metrics().error_count, Some(0));
    }

    #[test]
    fn test_memory_sampling_rate() {
        let config = RepositoryMetricsConfig {
            enabled: true,
            profile: MetricsProfile {
                enable_memory_tracking: true,
                memory_sample_rate: 3,
                ..MetricsProfile::default()
            },
        };
        let m = metrics(config);

        m.record_operation(1.0, false, None);
        m.record_operation(1.0, false, None);
        let snap = m.get_metrics();
        assert_eq!(snap.current_memory_mb, Some(0.0));
        assert!(snap.last_memory_check.is_none());

        m.record_operation(1.0, false, None);
        let snap = m.get_metrics();
        assert_eq!(snap.current_memory_mb, Some(64.0));
        assert_eq!(snap.memory_samples.map(|s| s.len()), Some(1));
        assert!(snap.last_memory_check.is_some());
    }

    #[test]
    fn test_invalid_duration_is_dropped_to_zero() {
        let m = metrics(RepositoryMetricsConfig::standard());
        m.record_operation(f64::NAN, false, None);
        m.record_operation(-5.0, false, None);

        let snap = m.get_metrics();
        assert_eq!(snap.operation_count, Some(2));
        assert_eq!(snap.avg_operation_time_ms, Some(0.0));
    }

    #[test]
    fn test_reset() {
        let m = metrics(RepositoryMetricsConfig::full());
        for _ in 0..100 {
            m.record_operation(700.0, true, None);
        }
        m.reset();

        let snap = m.get_metrics();
        assert_eq!(snap.operation_count, Some(0));
        assert_eq!(snap.error_count, Some(0));
        assert_eq!(snap.slow_query_count, Some(0));
        assert_eq!(snap.avg_operation_time_ms, Some(0.0));
        assert_eq!(snap.memory_samples.map(|s| s.len()), Some(0));
        assert!(snap.last_operation_time.is_none());
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        let config = RepositoryMetricsConfig {
            enabled: true,
            profile: MetricsProfile {
                memory_sample_rate: 0,
                ..MetricsProfile::default()
            },
        };
        assert!(RepositoryMetrics::new(config).is_err());
    }

    #[test]
    fn test_concurrent_recording() {
        let m = Arc::new(metrics(RepositoryMetricsConfig::standard()));
        let threads = 8;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        m.record_operation(10.0, false, None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snap = m.get_metrics();
        assert_eq!(snap.operation_count, Some(threads * 100));
        assert_eq!(snap.avg_operation_time_ms, Some(10.0));
    }
}
