//! Cache-aside layer in front of the durable metadata store.
//!
//! The cache is optional and best-effort. Lookups check the positive entry
//! (`meta:<key>`), then the negative entry (`meta404:<key>`), then the durable store;
//! a durable-store answer is written back as exactly one entry. Any cache failure
//! degrades to a direct durable-store read and is never surfaced to the caller.

use crate::config::CacheConfig;
use crate::error::{CacheError, StorageResult};
use crate::keys::{CacheKey, NEGATIVE_SENTINEL};
use crate::metadata_store::MetadataStore;
use crate::record::MetadataRecord;
use crate::ttl::{derive_cache_ttl, NEGATIVE_TTL_SECS};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Outcome of a cache read
#[derive(Debug)]
pub enum CacheLookup {
    /// Value present
    Hit(String),
    /// Key absent
    Miss,
    /// Cache could not answer (timeout, connection loss, command error)
    Unavailable(CacheError),
}

/// Single-key cache operations.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheLookup;

    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), CacheError>;
}

/// Redis-backed cache store.
///
/// The connection manager multiplexes one connection and is cloned per command;
/// every command is bounded by `command_timeout` and a timeout is reported as
/// [`CacheLookup::Unavailable`] without retry.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    command_timeout: Duration,
    command_timeout_ms: u64,
}

impl RedisCacheStore {
    /// Connect to the configured cache target within the connect timeout.
    pub async fn connect(config: &CacheConfig) -> Result<Self, CacheError> {
        let url = config
            .connection_url()
            .ok_or_else(|| CacheError::Connection("no cache target configured".to_string()))?;

        let client = redis::Client::open(url.as_str())?;

        let conn = tokio::time::timeout(config.connect_timeout(), ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout(config.connect_timeout_ms))??;

        info!(
            command_timeout_ms = config.command_timeout_ms,
            "Connected to metadata cache"
        );

        Ok(Self {
            conn,
            command_timeout: config.command_timeout(),
            command_timeout_ms: config.command_timeout_ms,
        })
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheLookup {
        let mut conn = self.conn.clone();

        match tokio::time::timeout(self.command_timeout, conn.get::<_, Option<String>>(key)).await {
            Ok(Ok(Some(value))) => CacheLookup::Hit(value),
            Ok(Ok(None)) => CacheLookup::Miss,
            Ok(Err(e)) => CacheLookup::Unavailable(CacheError::Redis(e)),
            Err(_) => CacheLookup::Unavailable(CacheError::Timeout(self.command_timeout_ms)),
        }
    }

    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();

        tokio::time::timeout(
            self.command_timeout,
            conn.set_ex::<_, _, ()>(key, value, ttl_secs),
        )
        .await
        .map_err(|_| CacheError::Timeout(self.command_timeout_ms))??;

        Ok(())
    }
}

/// Metadata lookups with cache-aside semantics
#[derive(Clone)]
pub struct MetadataCache {
    store: Arc<dyn MetadataStore>,
    cache: Option<Arc<dyn CacheStore>>,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn MetadataStore>, cache: Option<Arc<dyn CacheStore>>) -> Self {
        Self { store, cache }
    }

    /// Lookups go straight to the durable store.
    pub fn uncached(store: Arc<dyn MetadataStore>) -> Self {
        Self::new(store, None)
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// The durable store behind the cache
    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// Look up the record for a source key.
    ///
    /// `Ok(None)` means the durable store (or a live negative entry) says the key has
    /// not been processed. `Err` is only ever a durable-store failure.
    #[instrument(skip(self))]
    pub async fn get_metadata(&self, source_key: &str) -> StorageResult<Option<MetadataRecord>> {
        let Some(cache) = self.cache.as_ref() else {
            return self.store.get(source_key).await;
        };

        match cache.get(&CacheKey::metadata(source_key)).await {
            CacheLookup::Hit(data) => match MetadataRecord::from_json(&data) {
                Ok(record) => {
                    debug!("Metadata cache hit");
                    metrics::counter!("pictor.cache.hits").increment(1);
                    return Ok(Some(record));
                }
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable cache entry");
                    metrics::counter!("pictor.cache.errors", "kind" => "deserialize").increment(1);
                }
            },
            CacheLookup::Miss => {}
            CacheLookup::Unavailable(e) => return self.bypass(source_key, e).await,
        }

        match cache.get(&CacheKey::metadata_not_found(source_key)).await {
            CacheLookup::Hit(_) => {
                debug!("Metadata cache negative hit");
                metrics::counter!("pictor.cache.negative_hits").increment(1);
                return Ok(None);
            }
            CacheLookup::Miss => {}
            CacheLookup::Unavailable(e) => return self.bypass(source_key, e).await,
        }

        metrics::counter!("pictor.cache.misses").increment(1);

        let record = self.store.get(source_key).await?;
        let now = Utc::now().timestamp();

        let write = match &record {
            Some(record) => match record.to_json() {
                Ok(body) => {
                    let ttl = derive_cache_ttl(record.expires_at, now);
                    cache
                        .set_with_ttl(&CacheKey::metadata(source_key), ttl, &body)
                        .await
                }
                Err(e) => Err(CacheError::Serialization(e)),
            },
            None => {
                cache
                    .set_with_ttl(
                        &CacheKey::metadata_not_found(source_key),
                        NEGATIVE_TTL_SECS,
                        NEGATIVE_SENTINEL,
                    )
                    .await
            }
        };

        if let Err(e) = write {
            warn!(error = %e, "Metadata cache write-back failed");
            metrics::counter!("pictor.cache.errors", "kind" => "write").increment(1);
        }

        Ok(record)
    }

    async fn bypass(
        &self,
        source_key: &str,
        error: CacheError,
    ) -> StorageResult<Option<MetadataRecord>> {
        warn!(error = %error, "Metadata cache unavailable, reading durable store");
        metrics::counter!("pictor.cache.errors", "kind" => "unavailable").increment(1);
        self.store.get(source_key).await
    }
}
