use serde::Deserialize;
use std::time::Duration;

/// S3 object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding the generated thumbnails
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Durable metadata store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Table holding one metadata record per source object
    pub table: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Create the metadata table on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Optional metadata cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Enable the cache-aside layer
    #[serde(default)]
    pub enabled: bool,
    /// Cache target: `redis://`/`rediss://` URL or bare `host[:port]`
    pub url: Option<String>,
    /// Per-command timeout in milliseconds
    #[serde(default = "default_cache_timeout_ms")]
    pub command_timeout_ms: u64,
    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_cache_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_cache_timeout_ms() -> u64 {
    300
}

impl DatabaseConfig {
    /// Get connection acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// The table name is interpolated into SQL, so only plain identifiers are accepted.
    pub fn table_is_valid(&self) -> bool {
        let mut chars = self.table.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        self.table.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

impl CacheConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Normalized connection URL, or `None` when no target is configured.
    ///
    /// A bare `host[:port]` target becomes `redis://host:port`, defaulting to port 6379
    /// when the port is missing or not numeric.
    pub fn connection_url(&self) -> Option<String> {
        let target = self.url.as_deref()?.trim();
        if target.is_empty() {
            return None;
        }
        if target.starts_with("redis://") || target.starts_with("rediss://") {
            return Some(target.to_string());
        }

        let (host, port) = match target.split_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().unwrap_or(6379)),
            None => (target, 6379),
        };
        Some(format!("redis://{}:{}", host, port))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            command_timeout_ms: default_cache_timeout_ms(),
            connect_timeout_ms: default_cache_timeout_ms(),
        }
    }
}
