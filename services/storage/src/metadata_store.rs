use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::record::MetadataRecord;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

/// Durable key-value store for metadata records, keyed by source object key.
///
/// No transactions and no conditional writes: `put` is an unconditional overwrite.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch the record for a source key.
    async fn get(&self, source_key: &str) -> StorageResult<Option<MetadataRecord>>;

    /// Insert or overwrite the record keyed by `record.source_key`.
    async fn put(&self, record: &MetadataRecord) -> StorageResult<()>;

    /// Delete records whose retention expiry is at or before `now`. Returns the count.
    async fn delete_expired(&self, now: i64) -> StorageResult<u64>;

    /// Connectivity check.
    async fn ping(&self) -> StorageResult<()>;
}

#[derive(Debug, FromRow)]
struct MetadataRow {
    source_key: String,
    thumbnail_key: String,
    formats: Vec<String>,
    updated_at: i64,
    expires_at: Option<i64>,
}

impl From<MetadataRow> for MetadataRecord {
    fn from(row: MetadataRow) -> Self {
        Self {
            source_key: row.source_key,
            thumbnail_key: row.thumbnail_key,
            formats: row.formats.into_iter().collect(),
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        }
    }
}

/// PostgreSQL-backed metadata store
pub struct PgMetadataStore {
    pool: PgPool,
    table: String,
}

impl PgMetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        if !config.table_is_valid() {
            return Err(StorageError::InvalidRecord {
                operation: "metadata.connect",
                message: format!("invalid table name {:?}", config.table),
            });
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .map_err(|e| StorageError::database("metadata.connect", e))?;

        info!(table = %config.table, "Connected to metadata database");

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Create the metadata table if it does not exist yet
    pub async fn ensure_schema(&self) -> StorageResult<()> {
        info!(table = %self.table, "Ensuring metadata table exists");

        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                source_key     TEXT PRIMARY KEY,
                thumbnail_key  TEXT NOT NULL CHECK (thumbnail_key <> ''),
                formats        TEXT[] NOT NULL,
                updated_at     BIGINT NOT NULL,
                expires_at     BIGINT
            )
            "#,
            table = self.table
        );
        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("metadata.ensure_schema", e))?;

        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_expires_at_idx ON {table} (expires_at)",
            table = self.table
        );
        sqlx::query(&create_index)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("metadata.ensure_schema", e))?;

        Ok(())
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self))]
    async fn get(&self, source_key: &str) -> StorageResult<Option<MetadataRecord>> {
        let sql = format!(
            r#"
            SELECT source_key, thumbnail_key, formats, updated_at, expires_at
            FROM {table}
            WHERE source_key = $1
            "#,
            table = self.table
        );

        let row = sqlx::query_as::<_, MetadataRow>(&sql)
            .bind(source_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::database("metadata.get", e))?;

        metrics::counter!("pictor.metadata.reads").increment(1);

        Ok(row.map(MetadataRecord::from))
    }

    #[instrument(skip(self, record), fields(source_key = %record.source_key))]
    async fn put(&self, record: &MetadataRecord) -> StorageResult<()> {
        if record.thumbnail_key.is_empty() {
            return Err(StorageError::InvalidRecord {
                operation: "metadata.put",
                message: "thumbnail key is empty".to_string(),
            });
        }

        let sql = format!(
            r#"
            INSERT INTO {table} (
                source_key, thumbnail_key, formats, updated_at, expires_at
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO UPDATE SET
                thumbnail_key = EXCLUDED.thumbnail_key,
                formats = EXCLUDED.formats,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            "#,
            table = self.table
        );

        let formats: Vec<String> = record.formats.iter().cloned().collect();

        sqlx::query(&sql)
            .bind(&record.source_key)
            .bind(&record.thumbnail_key)
            .bind(&formats)
            .bind(record.updated_at)
            .bind(record.expires_at)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("metadata.put", e))?;

        debug!(thumbnail_key = %record.thumbnail_key, "Metadata record written");

        metrics::counter!("pictor.metadata.writes").increment(1);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_expired(&self, now: i64) -> StorageResult<u64> {
        let sql = format!(
            "DELETE FROM {table} WHERE expires_at IS NOT NULL AND expires_at <= $1",
            table = self.table
        );

        let result = sqlx::query(&sql)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("metadata.delete_expired", e))?;

        let count = result.rows_affected();
        info!(deleted_count = count, "Deleted expired metadata records");

        Ok(count)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::database("metadata.ping", e))?;
        Ok(())
    }
}
