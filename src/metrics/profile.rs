//! Metrics Collection Profiles
//!
//! A profile decides which counters a `RepositoryMetrics` instance tracks
//! and reports. Profiles are immutable once attached; changing them means
//! replacing the metrics instance.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which metrics are collected for a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsProfile {
    pub enable_operation_counting: bool,
    pub enable_error_tracking: bool,
    pub enable_timing_stats: bool,
    pub enable_memory_tracking: bool,
    /// Operations slower than this count as slow queries
    #[serde(with = "duration_ms")]
    pub slow_query_threshold: Duration,
    /// Sample process memory every N operations
    pub memory_sample_rate: u64,
}

impl Default for MetricsProfile {
    fn default() -> Self {
        Self {
            enable_operation_counting: true,
            enable_error_tracking: true,
            enable_timing_stats: true,
            enable_memory_tracking: false,
            slow_query_threshold: Duration::from_secs(1),
            memory_sample_rate: 100,
        }
    }
}

impl MetricsProfile {
    /// Slow-query threshold in milliseconds.
    pub fn slow_threshold_ms(&self) -> f64 {
        self.slow_query_threshold.as_secs_f64() * 1000.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory_sample_rate == 0 {
            return Err(Error::Configuration(
                "memory_sample_rate must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Profile plus the master on/off switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryMetricsConfig {
    pub enabled: bool,
    pub profile: MetricsProfile,
}

impl Default for RepositoryMetricsConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl RepositoryMetricsConfig {
    /// Counting, errors and timing; no memory sampling.
    pub fn standard() -> Self {
        Self {
            enabled: true,
            profile: MetricsProfile::default(),
        }
    }

    /// Counting and errors only.
    pub fn minimal() -> Self {
        Self {
            enabled: true,
            profile: MetricsProfile {
                enable_timing_stats: false,
                ..MetricsProfile::default()
            },
        }
    }

    /// Everything, with a tighter slow threshold and denser memory sampling.
    pub fn full() -> Self {
        Self {
            enabled: true,
            profile: MetricsProfile {
                enable_operation_counting: true,
                enable_error_tracking: true,
                enable_timing_stats: true,
                enable_memory_tracking: true,
                slow_query_threshold: Duration::from_millis(500),
                memory_sample_rate: 50,
            },
        }
    }

    /// Recording is a no-op.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            profile: MetricsProfile::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.profile.validate()
    }
}

/// Named profile selectable from configuration files and the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsPreset {
    #[default]
    Minimal,
    Standard,
    Full,
    Disabled,
}

impl MetricsPreset {
    pub fn config(self) -> RepositoryMetricsConfig {
        match self {
            MetricsPreset::Minimal => RepositoryMetricsConfig::minimal(),
            MetricsPreset::Standard => RepositoryMetricsConfig::standard(),
            MetricsPreset::Full => RepositoryMetricsConfig::full(),
            MetricsPreset::Disabled => RepositoryMetricsConfig::disabled(),
        }
    }
}

impl std::str::FromStr for MetricsPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "minimal" => Ok(MetricsPreset::Minimal),
            "standard" => Ok(MetricsPreset::Standard),
            "full" => Ok(MetricsPreset::Full),
            "disabled" => Ok(MetricsPreset::Disabled),
            other => Err(Error::Configuration(format!(
                "unknown metrics preset: {}",
                other
            ))),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let minimal = RepositoryMetricsConfig::minimal();
        assert!(minimal.enabled);
        assert!(minimal.profile.enable_operation_counting);
        assert!(minimal.profile.enable_error_tracking);
        assert!(!minimal.profile.enable_timing_stats);
        assert!(!minimal.profile.enable_memory_tracking);

        let full = RepositoryMetricsConfig::full();
        assert!(full.profile.enable_memory_tracking);
        assert_eq!(full.profile.slow_query_threshold, Duration::from_millis(500));
        assert_eq!(full.profile.memory_sample_rate, 50);

        assert!(!RepositoryMetricsConfig::disabled().enabled);
        assert_eq!(RepositoryMetricsConfig::default(), RepositoryMetricsConfig::standard());
    }

    #[test]
    fn test_slow_threshold_ms() {
        assert_eq!(MetricsProfile::default().slow_threshold_ms(), 1000.0);
        assert_eq!(RepositoryMetricsConfig::full().profile.slow_threshold_ms(), 500.0);
    }

    #[test]
    fn test_zero_sample_rate_is_invalid() {
        let config = RepositoryMetricsConfig {
            enabled: true,
            profile: MetricsProfile {
                memory_sample_rate: 0,
                ..MetricsProfile::default()
            },
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("full".parse::<MetricsPreset>().unwrap(), MetricsPreset::Full);
        assert_eq!("MINIMAL".parse::<MetricsPreset>().unwrap(), MetricsPreset::Minimal);
        assert!("verbose".parse::<MetricsPreset>().is_err());
        assert_eq!(MetricsPreset::default(), MetricsPreset::Minimal);
        assert_eq!(MetricsPreset::Disabled.config(), RepositoryMetricsConfig::disabled());
    }

    #[test]
    fn test_profile_yaml() {
        let profile: MetricsProfile =
            serde_yaml::from_str("enable_memory_tracking: true\nslow_query_threshold: 250\n")
                .unwrap();
        assert!(profile.enable_memory_tracking);
        assert!(profile.enable_timing_stats);
        assert_eq!(profile.slow_query_threshold, Duration::from_millis(250));
    }
}
