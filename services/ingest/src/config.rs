//! Configuration for the ingest service.

use crate::transform::{DEFAULT_MAX_DIMENSION, DEFAULT_QUALITY, MAX_JPEG_DIMENSION};
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use pictor_storage::config::{DatabaseConfig, S3Config};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure for the ingest service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Service identity and metrics
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upload notification consumer
    pub kafka: KafkaConfig,

    /// Destination bucket for thumbnails
    pub s3: S3Config,

    /// Durable metadata store
    pub database: DatabaseConfig,

    /// Thumbnail settings
    #[serde(default)]
    pub transform: TransformConfig,

    /// Expired record sweep
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Kafka consumer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Topic carrying bucket notifications for uploaded objects
    #[serde(default = "default_notification_topic")]
    pub notification_topic: String,

    /// Enable SSL
    #[serde(default)]
    pub ssl_enabled: bool,

    /// SSL CA certificate path
    pub ssl_ca_location: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// Auto offset reset policy
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Max poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Deliveries of one message before it is parked on the dead letter topic
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    /// Delay before the first redelivery, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Upper bound on the redelivery delay
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,

    /// Topic receiving notifications that exhausted their delivery attempts
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,
}

/// Thumbnail settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    /// Bound on the larger output dimension in pixels
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    /// JPEG quality (1-100)
    #[serde(default = "default_quality")]
    pub quality: u8,
}

/// Periodic deletion of records past their retention expiry.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_retention_interval")]
    pub interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_service_name() -> String {
    "pictor-ingest".to_string()
}

fn default_metrics_port() -> u16 {
    9091
}

fn default_consumer_group() -> String {
    "pictor-ingest".to_string()
}

fn default_notification_topic() -> String {
    "pictor.uploads".to_string()
}

fn default_auto_offset_reset() -> String {
    "earliest".to_string()
}

fn default_session_timeout_ms() -> u32 {
    30000
}

fn default_max_poll_interval_ms() -> u32 {
    300000
}

fn default_max_delivery_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_retry_backoff_ms() -> u64 {
    30000
}

fn default_dead_letter_topic() -> String {
    "pictor.uploads.dead-letter".to_string()
}

fn default_max_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

fn default_true() -> bool {
    true
}

fn default_retention_interval() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            quality: default_quality(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_retention_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl KafkaConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }
}

impl RetentionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Later sources override earlier ones:
    /// 1. `config/ingest`
    /// 2. `/etc/pictor/ingest`
    /// 3. Environment variables prefixed with `INGEST__`
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(File::with_name("/etc/pictor/ingest").required(false))
            // INGEST__KAFKA__BOOTSTRAP_SERVERS -> kafka.bootstrap_servers
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "kafka.bootstrap_servers".to_string(),
            ));
        }

        if self.kafka.notification_topic.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "kafka.notification_topic".to_string(),
            ));
        }

        if self.kafka.max_delivery_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "kafka.max_delivery_attempts".to_string(),
                message: "Attempts must be greater than 0".to_string(),
            });
        }

        if self.kafka.dead_letter_topic.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "kafka.dead_letter_topic".to_string(),
            ));
        }
        if self.kafka.dead_letter_topic == self.kafka.notification_topic {
            return Err(ConfigValidationError::InvalidValue {
                field: "kafka.dead_letter_topic".to_string(),
                message: "Must differ from the notification topic".to_string(),
            });
        }

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

        if self.transform.max_dimension == 0 || self.transform.max_dimension > MAX_JPEG_DIMENSION {
            return Err(ConfigValidationError::InvalidValue {
                field: "transform.max_dimension".to_string(),
                message: format!("Dimension must be between 1 and {}", MAX_JPEG_DIMENSION),
            });
        }

        if !(1..=100).contains(&self.transform.quality) {
            return Err(ConfigValidationError::InvalidValue {
                field: "transform.quality".to_string(),
                message: "Quality must be between 1 and 100".to_string(),
            });
        }

        if self.retention.enabled && self.retention.interval_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "retention.interval_secs".to_string(),
                message: "Interval must be greater than 0".to_string(),
            });
        }

        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> IngestConfig {
        IngestConfig {
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            kafka: KafkaConfig {
                bootstrap_servers: "kafka:9092".to_string(),
                consumer_group: default_consumer_group(),
                notification_topic: default_notification_topic(),
                ssl_enabled: false,
                ssl_ca_location: None,
                sasl_username: None,
                sasl_password: None,
                auto_offset_reset: default_auto_offset_reset(),
                session_timeout_ms: default_session_timeout_ms(),
                max_poll_interval_ms: default_max_poll_interval_ms(),
                max_delivery_attempts: default_max_delivery_attempts(),
                retry_backoff_ms: default_retry_backoff_ms(),
                max_retry_backoff_ms: default_max_retry_backoff_ms(),
                dead_letter_topic: default_dead_letter_topic(),
            },
            s3: S3Config {
                bucket: "thumbnails".to_string(),
                region: "us-east-1".to_string(),
                endpoint_url: Some("http://minio:9000".to_string()),
                force_path_style: true,
                multipart_threshold_bytes: 5 * 1024 * 1024,
                part_size_bytes: 5 * 1024 * 1024,
            },
            database: DatabaseConfig {
                url: "postgres://db/pictor".to_string(),
                table: "image_metadata".to_string(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout_secs: 5,
                idle_timeout_secs: 600,
                run_migrations: true,
            },
            transform: TransformConfig::default(),
            retention: RetentionConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.transform.max_dimension, 800);
        assert_eq!(config.transform.quality, 85);
        assert_eq!(config.retention.interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_missing_bootstrap_servers() {
        let mut config = create_test_config();
        config.kafka.bootstrap_servers = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_missing_destination_bucket() {
        let mut config = create_test_config();
        config.s3.bucket = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "s3.bucket"
        ));
    }

    #[test]
    fn test_invalid_quality() {
        let mut config = create_test_config();
        config.transform.quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_invalid_table() {
        let mut config = create_test_config();
        config.database.table = "image metadata".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_dead_letter_topic_must_differ() {
        let mut config = create_test_config();
        config.kafka.dead_letter_topic = config.kafka.notification_topic.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { field, .. }) if field == "kafka.dead_letter_topic"
        ));
    }

    #[test]
    fn test_zero_delivery_attempts() {
        let mut config = create_test_config();
        config.kafka.max_delivery_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_dimension_bounds() {
        let mut config = create_test_config();
        config.transform.max_dimension = 70_000;
        assert!(config.validate().is_err());

        config.transform.max_dimension = 65_535;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_disabled_retention_skips_interval_check() {
        let mut config = create_test_config();
        config.retention.interval_secs = 0;
        assert!(config.validate().is_err());

        config.retention.enabled = false;
        assert!(config.validate().is_ok());
    }
}
