//! Cache key schema for metadata entries.

/// Value stored under a negative entry.
pub const NEGATIVE_SENTINEL: &str = "1";

pub struct CacheKey;

impl CacheKey {
    /// Positive entry holding a serialized record
    pub fn metadata(source_key: &str) -> String {
        format!("meta:{}", source_key)
    }

    /// Negative entry recording that the durable store had no record
    pub fn metadata_not_found(source_key: &str) -> String {
        format!("meta404:{}", source_key)
    }
}
