use pictor_storage::config::{CacheConfig, DatabaseConfig, S3Config};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the read service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Thumbnail bucket
    pub s3: S3Config,
    /// Durable metadata store
    pub database: DatabaseConfig,
    /// Optional metadata cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// Thumbnail delivery strategy
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// How `/img/<key>` hands out thumbnails
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Redirect to the CDN instead of returning a presigned URL
    #[serde(default)]
    pub cdn_redirect: bool,
    /// CDN domain the thumbnail keys are served under
    pub cdn_domain: Option<String>,
    /// Presigned URL lifetime in seconds
    #[serde(default = "default_presign_expiry_secs")]
    pub presign_expiry_secs: u64,
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "pictor-reader".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_presign_expiry_secs() -> u64 {
    300
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from config files and environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/reader").required(false))
            .add_source(config::File::with_name("/etc/pictor/reader").required(false))
            // READER__DATABASE__TABLE -> database.table
            .add_source(
                config::Environment::with_prefix("READER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Check required identifiers and value ranges.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.s3.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField("s3.bucket".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "database.url".to_string(),
            ));
        }

        if self.database.table.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "database.table".to_string(),
            ));
        }
        if !self.database.table_is_valid() {
            return Err(ConfigValidationError::InvalidValue {
                field: "database.table".to_string(),
                message: "must be a plain SQL identifier".to_string(),
            });
        }

        if self.cache.enabled && self.cache.connection_url().is_none() {
            return Err(ConfigValidationError::MissingField("cache.url".to_string()));
        }
        if self.cache.command_timeout_ms == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "cache.command_timeout_ms".to_string(),
                message: "timeout must be greater than 0".to_string(),
            });
        }

        if self.delivery.presign_expiry_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "delivery.presign_expiry_secs".to_string(),
                message: "expiry must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn presign_expiry(&self) -> Duration {
        Duration::from_secs(self.delivery.presign_expiry_secs)
    }
}

impl DeliveryConfig {
    /// Configured CDN domain, ignoring blank values
    pub fn cdn_domain(&self) -> Option<&str> {
        self.cdn_domain
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cdn_redirect: false,
            cdn_domain: None,
            presign_expiry_secs: default_presign_expiry_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
