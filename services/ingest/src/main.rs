//! Ingest service for the Pictor image service.
//!
//! Consumes bucket notifications from Kafka and writes a thumbnail plus a metadata
//! record for every uploaded image.
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (`config/ingest`, `/etc/pictor/ingest`)
//! 2. Environment variables (prefixed with `INGEST__`)

use anyhow::Context;
use pictor_ingest::config::{IngestConfig, LoggingConfig};
use pictor_ingest::{IngestPipeline, NotificationConsumer, RetentionSweeper, ThumbnailTransform};
use pictor_storage::{PgMetadataStore, S3ObjectStore};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IngestConfig::load().context("Failed to load configuration")?;

    init_logging(&config.logging)?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Pictor ingest service"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    init_metrics(config.service.metrics_port)?;

    let metadata_store = Arc::new(
        PgMetadataStore::new(&config.database)
            .await
            .context("Failed to initialize metadata store")?,
    );

    if config.database.run_migrations {
        metadata_store
            .ensure_schema()
            .await
            .context("Failed to create metadata table")?;
    }

    let object_store = Arc::new(S3ObjectStore::new(&config.s3).await);

    let pipeline = Arc::new(IngestPipeline::new(
        object_store,
        metadata_store.clone(),
        ThumbnailTransform::new(config.transform.max_dimension, config.transform.quality),
        config.s3.bucket.clone(),
    ));

    let consumer = NotificationConsumer::new(&config.kafka, pipeline)
        .context("Failed to initialize Kafka consumer")?;

    let shutdown = CancellationToken::new();

    let consumer_token = shutdown.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(consumer_token).await {
            error!(error = %e, "Notification consumer error");
        }
    });

    let sweeper_handle = if config.retention.enabled {
        let sweeper = RetentionSweeper::new(metadata_store, config.retention.interval());
        Some(tokio::spawn(sweeper.run(shutdown.clone())))
    } else {
        None
    };

    info!("Ingest service started successfully");

    shutdown_signal().await;

    info!("Shutting down ingest service");
    shutdown.cancel();

    if let Err(e) = consumer_handle.await {
        error!(error = %e, "Consumer task failed");
    }
    if let Some(handle) = sweeper_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Retention task failed");
        }
    }

    info!("Ingest service stopped");

    Ok(())
}

/// Initialize the tracing subscriber.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("pictor_ingest={}", level).parse()?)
        .add_directive(format!("pictor_storage={}", level).parse()?)
        .add_directive("rdkafka=warn".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
