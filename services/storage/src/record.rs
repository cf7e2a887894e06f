use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Encoding produced for every thumbnail.
pub const THUMBNAIL_FORMAT: &str = "jpg";

/// Retention of a metadata record in the durable store (7 days).
pub const RECORD_RETENTION_SECS: i64 = 7 * 24 * 3600;

/// Metadata record for one processed source image.
///
/// The durable store is the system of record for these; a record's existence means the
/// source object has been processed and `thumbnail_key` points at its thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// Key of the originally uploaded object (primary key)
    pub source_key: String,
    /// Key of the derived thumbnail in the destination bucket
    pub thumbnail_key: String,
    /// Encodings produced
    pub formats: BTreeSet<String>,
    /// Last write time (unix seconds)
    pub updated_at: i64,
    /// Absolute retention expiry (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl MetadataRecord {
    /// Build the record written by one ingest run at `now`.
    pub fn processed(source_key: impl Into<String>, thumbnail_key: impl Into<String>, now: i64) -> Self {
        Self {
            source_key: source_key.into(),
            thumbnail_key: thumbnail_key.into(),
            formats: BTreeSet::from([THUMBNAIL_FORMAT.to_string()]),
            updated_at: now,
            expires_at: Some(now + RECORD_RETENTION_SECS),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processed_record_fields() {
        let record = MetadataRecord::processed("uploads/cat.png", "resized/cat-800.jpg", 1_700_000_000);

        assert_eq!(record.source_key, "uploads/cat.png");
        assert_eq!(record.thumbnail_key, "resized/cat-800.jpg");
        assert_eq!(record.formats, BTreeSet::from(["jpg".to_string()]));
        assert_eq!(record.updated_at, 1_700_000_000);
        assert_eq!(record.expires_at, Some(1_700_000_000 + 604_800));
    }

    #[test]
    fn test_json_uses_camel_case() {
        let record = MetadataRecord::processed("sample.jpg", "resized/sample-800.jpg", 10);
        let json = record.to_json().unwrap();

        assert!(json.contains("\"sourceKey\":\"sample.jpg\""));
        assert!(json.contains("\"thumbnailKey\":\"resized/sample-800.jpg\""));
        assert!(json.contains("\"formats\":[\"jpg\"]"));
        assert!(json.contains("\"expiresAt\":604810"));
    }

    #[test]
    fn test_deserialize_without_expiry() {
        let json = r#"{
            "sourceKey": "sample.jpg",
            "thumbnailKey": "resized/sample-800.jpg",
            "formats": ["jpg"],
            "updatedAt": 42
        }"#;

        let record = MetadataRecord::from_json(json).unwrap();
        assert_eq!(record.expires_at, None);
        assert_eq!(record.updated_at, 42);
    }
}
