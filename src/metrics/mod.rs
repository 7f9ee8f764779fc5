//! Repository Metrics
//!
//! ```text
//!   RepositoryFactory ──owns──▶ MetricsRegistry ◀──clone── InstrumentedRepository
//!                                     │
//!                     entity_type ──▶ RepositoryMetrics (profile, counters)
//!                                     │
//!                              MetricsExporter ──▶ /metrics
//! ```
//!
//! - **profile** - Collection profiles and named presets
//! - **repository** - Per-entity counters and snapshots
//! - **registry** - Shared entity → metrics map and the operation guard
//! - **memory** - Process memory probes
//! - **exporter** - Prometheus gauges

pub mod exporter;
pub mod memory;
pub mod profile;
pub mod registry;
pub mod repository;

pub use exporter::MetricsExporter;
pub use memory::{MemoryProbe, ProcessMemoryProbe, StaticMemoryProbe};
pub use profile::{MetricsPreset, MetricsProfile, RepositoryMetricsConfig};
pub use registry::{MetricsRegistry, OperationGuard};
pub use repository::{MetricsSnapshot, RepositoryMetrics, MEMORY_WINDOW_SECS};
