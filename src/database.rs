//! Connection pool manager.

use std::time::Instant;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use tracing::{info, instrument, warn};

use crate::config::{DatabaseConfig, PoolConfig};
use crate::error::{Error, Result};
use crate::health::HealthCheckResult;

/// Owns the PostgreSQL pool for the process.
pub struct DatabaseManager {
    pool: PgPool,
    config: DatabaseConfig,
    pool_config: PoolConfig,
}

impl DatabaseManager {
    /// Build a pool from the connection and pool settings.
    ///
    /// `search_path` is set to the configured schema on every connection.
    #[instrument(skip_all, fields(host = %config.host, database = %config.database))]
    pub async fn connect(config: &DatabaseConfig, pool_config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        pool_config.validate()?;

        let ssl_mode: PgSslMode = config
            .ssl_mode
            .parse()
            .map_err(|e| Error::Configuration(format!("invalid ssl_mode: {}", e)))?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.username)
            .password(&config.password)
            .ssl_mode(ssl_mode)
            .options([("search_path", config.schema.as_str())]);

        let pool = PgPoolOptions::new()
            .min_connections(pool_config.pool_size)
            .max_connections(pool_config.max_connections())
            .acquire_timeout(pool_config.pool_timeout()?)
            .max_lifetime(pool_config.pool_recycle()?)
            .test_before_acquire(pool_config.pre_ping)
            .connect_with(options)
            .await?;

        info!(
            url = %config.redacted_url(),
            max_connections = pool_config.max_connections(),
            "Connected to PostgreSQL"
        );

        Ok(Self {
            pool,
            config: config.clone(),
            pool_config: pool_config.clone(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// Round-trip `SELECT 1` and report pool occupancy.
    #[instrument(skip(self))]
    pub async fn check_health(&self) -> HealthCheckResult {
        let started = Instant::now();
        let probe: std::result::Result<i32, sqlx::Error> =
            sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await;

        let result = match probe {
            Ok(_) => HealthCheckResult::healthy("database"),
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                HealthCheckResult::unhealthy("database", e.to_string())
            }
        };
        result
            .with_detail("pool_size", self.pool.size())
            .with_detail("idle_connections", self.pool.num_idle() as u64)
            .with_detail("max_connections", self.pool_config.max_connections())
            .with_duration(started.elapsed())
    }

    /// Close every connection and wait for checked-out ones to return.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database pool closed");
    }
}

impl std::fmt::Debug for DatabaseManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseManager")
            .field("url", &self.config.redacted_url())
            .field("pool_size", &self.pool.size())
            .finish()
    }
}
