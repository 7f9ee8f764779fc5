//! AXAI PG - PostgreSQL data-access layer
//!
//! Repositories over a PostgreSQL document/graph schema, with a shared
//! query-result cache and per-entity operation metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       RepositoryFactory                           │
//! │   entity_type ──▶ Instrumented(Cached(Base | Document))           │
//! │   entity_type ──▶ RepositoryMetrics                               │
//! └──────────────────────────────────────────────────────────────────┘
//!          │                      │                       │
//!          ▼                      ▼                       ▼
//!   ┌─────────────┐      ┌────────────────┐      ┌─────────────────┐
//!   │ CacheStore  │      │ MetricsRegistry│      │   Persistence   │
//!   │ TTL + LFU   │      │ ops/errors/mem │      │ PgStore / InMem │
//!   └─────────────┘      └────────────────┘      └─────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Persistence and access-control adapters
//! - [`cache`] - TTL cache with hit-count eviction
//! - [`config`] - Database, pool, cache and metrics configuration
//! - [`database`] - PostgreSQL pool manager
//! - [`domain`] - Value objects and ports
//! - [`error`] - Error types
//! - [`factory`] - Repository factory and scoped sessions
//! - [`health`] - Health checks
//! - [`metrics`] - Repository metrics and Prometheus export
//! - [`repository`] - Repository traits, implementations and decorators

pub mod adapters;
pub mod cache;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod factory;
pub mod health;
pub mod metrics;
pub mod repository;

// Re-export commonly used types
pub use cache::{CacheStats, CacheStore, QueryCache};
pub use config::{AppConfig, CacheConfig, DatabaseConfig, Environment, PoolConfig};
pub use database::DatabaseManager;
pub use error::{Error, Result};
pub use factory::{RepositoryFactory, RepositorySession};
pub use metrics::{MetricsSnapshot, RepositoryMetrics, RepositoryMetricsConfig};
pub use repository::{DocumentQueries, Repository, RepositoryHandle};
