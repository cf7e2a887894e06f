use anyhow::{Context, Result};
use pictor_reader::{start_api_server, AppState, Config, ReadService, ThumbnailDelivery};
use pictor_storage::{CacheStore, MetadataCache, PgMetadataStore, RedisCacheStore, S3ObjectStore};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    init_tracing(&config.service.log_level);

    config.validate().context("Invalid configuration")?;

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting Pictor read service"
    );

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

    let cache: Option<Arc<dyn CacheStore>> = if config.cache.enabled {
        match RedisCacheStore::connect(&config.cache).await {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %e, "Metadata cache unreachable, continuing without cache");
                None
            }
        }
    } else {
        None
    };

    let delivery = ThumbnailDelivery::from_config(&config);
    if let ThumbnailDelivery::CdnRedirect { domain: None } = &delivery {
        warn!("CDN redirect enabled without a CDN domain; image requests will fail");
    }

    let service = ReadService::new(
        MetadataCache::new(metadata_store, cache),
        object_store,
        delivery,
    );

    let state = AppState {
        service: Arc::new(service),
    };

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Read service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
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
