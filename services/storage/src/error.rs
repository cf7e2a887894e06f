use thiserror::Error;

/// Errors raised by the durable stores (metadata and objects).
///
/// Every variant carries the name of the operation that failed so callers can log
/// it without re-deriving context.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{operation} failed: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} failed: {message}")]
    ObjectStore {
        operation: &'static str,
        message: String,
    },

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("{operation} failed: invalid record: {message}")]
    InvalidRecord {
        operation: &'static str,
        message: String,
    },
}

impl StorageError {
    pub fn database(operation: &'static str, source: sqlx::Error) -> Self {
        Self::Database { operation, source }
    }

    pub fn object_store(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ObjectStore {
            operation,
            message: err.to_string(),
        }
    }

    /// Name of the operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Database { operation, .. }
            | Self::ObjectStore { operation, .. }
            | Self::InvalidRecord { operation, .. } => operation,
            Self::ObjectNotFound { .. } => "object.get",
        }
    }
}

/// Errors raised by the cache store. These never reach a request caller.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache command timed out after {0}ms")]
    Timeout(u64),

    #[error("cache command failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_name_is_preserved() {
        let err = StorageError::object_store("object.presign", "signing failed");
        assert_eq!(err.operation(), "object.presign");
        assert_eq!(err.to_string(), "object.presign failed: signing failed");

        let err = StorageError::ObjectNotFound {
            bucket: "uploads".to_string(),
            key: "a.jpg".to_string(),
        };
        assert_eq!(err.operation(), "object.get");
    }
}
