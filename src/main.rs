//! AXAI PG service
//!
//! Wires the data-access layer together and exposes its metrics and health.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          axai-pg                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   PgStore /  │◀───│  Repository  │───▶│   Metrics    │──▶ /metrics
//! │  │ InMemoryStore│    │   Factory    │    │   Exporter   │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! │         ▲                   │                                    │
//! │         └──── HealthCheck ◀─┴── CacheStore ──────────────────────▶ /healthz /readyz
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use axai_pg::adapters::{InMemoryStore, PgStore};
use axai_pg::cache::{CacheStore, QueryCache};
use axai_pg::config::{AppConfig, Environment};
use axai_pg::database::DatabaseManager;
use axai_pg::domain::Persistence;
use axai_pg::factory::RepositoryFactory;
use axai_pg::health::{HealthCheck, HealthResponse};
use axai_pg::metrics::{MetricsExporter, MetricsPreset};

// =============================================================================
// CLI Arguments
// =============================================================================

/// PostgreSQL data-access layer with query caching and repository metrics
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "AXAI_PG_CONFIG")]
    config: Option<PathBuf>,

    /// Deployment environment (development, test, production)
    #[arg(long, env = "APP_ENV")]
    environment: Option<Environment>,

    /// Metrics profile (minimal, standard, full, disabled)
    #[arg(long, env = "METRICS_PRESET")]
    metrics_preset: Option<MetricsPreset>,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Use the in-memory store instead of PostgreSQL
    #[arg(long, env = "IN_MEMORY")]
    in_memory: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    info!("Starting axai-pg");
    info!("  Environment: {}", config.environment);
    info!("  Database: {}", config.database.redacted_url());
    info!("  Cache enabled: {}", config.cache.enabled);
    info!("  Metrics preset: {:?}", config.metrics);

    let cache = Arc::new(CacheStore::new(&config.cache)?);

    let (store, database): (Arc<dyn Persistence>, Option<Arc<DatabaseManager>>) = if args.in_memory {
        warn!("Using in-memory store; data is not persisted");
        (Arc::new(InMemoryStore::new()), None)
    } else {
        let database = Arc::new(
            DatabaseManager::connect(&config.database, &config.pool())
                .await
                .context("failed to connect to PostgreSQL")?,
        );
        let store = PgStore::new(database.pool().clone());
        store.ensure_schema().await?;
        (Arc::new(store), Some(database))
    };

    let factory = RepositoryFactory::install(Arc::new(RepositoryFactory::with_default_metrics(
        config.metrics_config(),
    )))?;
    let query_cache: Arc<dyn QueryCache> = cache.clone();
    factory.register_defaults(Arc::clone(&store), Some(query_cache), &config.cache)?;
    info!("Registered {} repositories", factory.registered_types().len());

    let exporter = Arc::new(MetricsExporter::new(
        factory.metrics_registry(),
        Some(Arc::clone(&cache)),
    )?);

    let mut health = HealthCheck::new(Arc::clone(&store)).with_cache(Arc::clone(&cache));
    if let Some(database) = &database {
        health = health.with_database(Arc::clone(database));
    }
    let health = Arc::new(health);

    // Eager sweep so expired entries do not linger until their next lookup
    let sweeper = Arc::clone(&cache);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let purged = sweeper.purge_expired();
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries");
            }
        }
    });

    let health_addr = parse_addr(&args.health_addr)?;
    let health_server = Arc::clone(&health);
    tokio::spawn(async move {
        if let Err(e) = run_health_server(health_addr, health_server).await {
            error!("Health server error: {}", e);
        }
    });

    let metrics_addr = parse_addr(&args.metrics_addr)?;
    let metrics_exporter = Arc::clone(&exporter);
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, metrics_exporter).await {
            error!("Metrics server error: {}", e);
        }
    });

    health.set_ready(true);
    info!("Ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("Shutting down");
    health.set_ready(false);
    if let Some(database) = database {
        database.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::default(),
    };
    config.database = config.database.with_env_overrides()?;
    if let Some(environment) = args.environment {
        config.environment = environment;
    }
    if let Some(preset) = args.metrics_preset {
        config.metrics = preset;
    }
    config.validate()?;
    Ok(config)
}

fn parse_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    addr.parse()
        .with_context(|| format!("invalid bind address: {}", addr))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("sqlx=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

// =============================================================================
// HTTP
// =============================================================================

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response(report: &HealthResponse) -> Response<Full<Bytes>> {
    let status = if report.status.is_serving() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    match serde_json::to_vec(report) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string()),
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: SocketAddr, health: Arc<HealthCheck>) -> anyhow::Result<()> {
    async fn health_handler(
        health: Arc<HealthCheck>,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/healthz" | "/livez" => json_response(&health.liveness()),
            "/readyz" => json_response(&health.readiness().await),
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind health server")?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("health server accept error")?;
        let io = TokioIo::new(stream);
        let health = Arc::clone(&health);

        tokio::spawn(async move {
            let service = service_fn(move |req| health_handler(Arc::clone(&health), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, exporter: Arc<MetricsExporter>) -> anyhow::Result<()> {
    async fn metrics_handler(
        exporter: Arc<MetricsExporter>,
        req: Request<hyper::body::Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let response = match req.uri().path() {
            "/metrics" => match exporter.render() {
                Ok(body) => respond(StatusCode::OK, exporter.content_type(), body),
                Err(e) => {
                    error!("Failed to render metrics: {}", e);
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", e.to_string())
                }
            },
            _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
        };
        Ok(response)
    }

    let listener = TcpListener::bind(addr)
        .await
        .context("failed to bind metrics server")?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept error")?;
        let io = TokioIo::new(stream);
        let exporter = Arc::clone(&exporter);

        tokio::spawn(async move {
            let service = service_fn(move |req| metrics_handler(Arc::clone(&exporter), req));
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
