//! Bucket notification events, as published by S3 and MinIO.

use serde::Deserialize;
use thiserror::Error;

/// One newly written source object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRecord {
    pub bucket: String,
    /// Decoded object key
    pub key: String,
}

impl TriggerRecord {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Message has no payload")]
    EmptyPayload,

    #[error("Invalid notification payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("Object key is not valid percent-encoded UTF-8: {0}")]
    InvalidKey(String),
}

#[derive(Debug, Deserialize)]
struct BucketNotification {
    #[serde(rename = "Records", default)]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Object keys arrive form-encoded: `+` is a space, everything else percent-encoded.
pub fn decode_object_key(raw: &str) -> Result<String, TriggerError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| TriggerError::InvalidKey(raw.to_string()))
}

/// Parse a notification into trigger records, in delivery order.
///
/// Notifications without records (such as the test event sent when a bucket
/// notification is configured) yield an empty list.
pub fn parse_notification(payload: &[u8]) -> Result<Vec<TriggerRecord>, TriggerError> {
    let notification: BucketNotification = serde_json::from_slice(payload)?;

    notification
        .records
        .into_iter()
        .map(|record| {
            Ok(TriggerRecord {
                bucket: record.s3.bucket.name,
                key: decode_object_key(&record.s3.object.key)?,
            })
        })
        .collect()
}
