//! Per-record ingest: fetch the source object, produce its thumbnail, store it and
//! upsert the metadata record.
//!
//! ```text
//! RECEIVED ──▶ FILTERED_OUT
//!    │
//!    ▼
//! FETCHED ──▶ TRANSFORMED ──▶ STORED ──▶ METADATA_WRITTEN
//! ```
//!
//! A failing step aborts that record only; records of a batch are independent and
//! completed ones are never rolled back. There is no internal retry.

use crate::transform::{ThumbnailTransform, TransformError};
use crate::trigger::TriggerRecord;
use chrono::Utc;
use pictor_storage::record::THUMBNAIL_FORMAT;
use pictor_storage::{content_type_for, MetadataRecord, MetadataStore, ObjectStore, StorageError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// Source key suffixes that are processed, compared case-insensitively
pub const IMAGE_SUFFIXES: [&str; 6] = [".jpg", ".jpeg", ".png", ".webp", ".bmp", ".tiff"];

/// Prefix of every thumbnail key in the destination bucket
pub const THUMBNAIL_PREFIX: &str = "resized";

/// Pipeline step at which a record failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Transform,
    Store,
    MetadataWrite,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Transform => "transform",
            Self::Store => "store",
            Self::MetadataWrite => "metadata_write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable failure of one record, tagged with its stage.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetch of {bucket}/{key} failed: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("transform of {key} failed: {source}")]
    Transform {
        key: String,
        #[source]
        source: TransformError,
    },

    #[error("upload of {thumbnail_key} failed: {source}")]
    Store {
        thumbnail_key: String,
        #[source]
        source: StorageError,
    },

    #[error("metadata write for {key} failed: {source}")]
    MetadataWrite {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl IngestError {
    pub fn stage(&self) -> Stage {
        match self {
            Self::Fetch { .. } => Stage::Fetch,
            Self::Transform { .. } => Stage::Transform,
            Self::Store { .. } => Stage::Store,
            Self::MetadataWrite { .. } => Stage::MetadataWrite,
        }
    }
}

/// Terminal state of a record that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Extension not in the allow-list; nothing was read or written
    FilteredOut,
    /// Thumbnail stored and metadata upserted
    Written { thumbnail_key: String },
}

/// Per-record results of one batch, in input order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(TriggerRecord, Result<RecordOutcome, IngestError>)>,
}

impl BatchReport {
    pub fn written(&self) -> usize {
        self.count(|r| matches!(r, Ok(RecordOutcome::Written { .. })))
    }

    pub fn filtered_out(&self) -> usize {
        self.count(|r| matches!(r, Ok(RecordOutcome::FilteredOut)))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| r.is_err())
    }

    /// Every record was written or filtered out
    pub fn is_complete(&self) -> bool {
        self.failed() == 0
    }

    fn count(&self, pred: impl Fn(&Result<RecordOutcome, IngestError>) -> bool) -> usize {
        self.results.iter().filter(|(_, r)| pred(r)).count()
    }
}

/// Whether a key names an allow-listed image
pub fn is_image_key(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    IMAGE_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// `resized/<stem>-<max_dimension>.jpg`, where stem is the base name without its
/// last extension
pub fn thumbnail_key_for(source_key: &str, max_dimension: u32) -> String {
    let stem = Path::new(source_key)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "{}/{}-{}.{}",
        THUMBNAIL_PREFIX, stem, max_dimension, THUMBNAIL_FORMAT
    )
}

pub struct IngestPipeline {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    transform: Arc<ThumbnailTransform>,
    destination_bucket: String,
}

impl IngestPipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        transform: ThumbnailTransform,
        destination_bucket: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            metadata,
            transform: Arc::new(transform),
            destination_bucket: destination_bucket.into(),
        }
    }

    /// Thumbnails written by this pipeline must never be fed back into it.
    fn is_own_output(&self, record: &TriggerRecord) -> bool {
        record.bucket == self.destination_bucket
            && record
                .key
                .strip_prefix(THUMBNAIL_PREFIX)
                .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Process every record of a batch to completion, independently.
    pub async fn process_batch(&self, records: Vec<TriggerRecord>) -> BatchReport {
        let mut report = BatchReport::default();

        for record in records {
            let result = self.process_record(&record).await;
            if let Err(e) = &result {
                error!(
                    bucket = %record.bucket,
                    key = %record.key,
                    stage = %e.stage(),
                    error = %e,
                    "Failed to ingest record"
                );
                metrics::counter!("pictor.ingest.records.failed", "stage" => e.stage().as_str())
                    .increment(1);
            }
            report.results.push((record, result));
        }

        report
    }

    pub async fn process_record(
        &self,
        record: &TriggerRecord,
    ) -> Result<RecordOutcome, IngestError> {
        self.process_record_at(record, Utc::now().timestamp()).await
    }

    /// Process one record with `now` as the write time.
    #[instrument(skip(self, record), fields(bucket = %record.bucket, key = %record.key))]
    pub async fn process_record_at(
        &self,
        record: &TriggerRecord,
        now: i64,
    ) -> Result<RecordOutcome, IngestError> {
        if !is_image_key(&record.key) {
            debug!("Skipping non-image object");
            metrics::counter!("pictor.ingest.records.filtered").increment(1);
            return Ok(RecordOutcome::FilteredOut);
        }

        if self.is_own_output(record) {
            debug!("Skipping generated thumbnail");
            metrics::counter!("pictor.ingest.records.filtered").increment(1);
            return Ok(RecordOutcome::FilteredOut);
        }

        let started = Instant::now();
        let thumbnail_key = thumbnail_key_for(&record.key, self.transform.max_dimension());

        let raw = self
            .objects
            .get(&record.bucket, &record.key)
            .await
            .map_err(|source| IngestError::Fetch {
                bucket: record.bucket.clone(),
                key: record.key.clone(),
                source,
            })?;

        let source_size = raw.len();
        let thumbnail = self
            .transform
            .clone()
            .generate_async(raw)
            .await
            .map_err(|source| IngestError::Transform {
                key: record.key.clone(),
                source,
            })?;

        let object_metadata = vec![
            (
                "source-key".to_string(),
                urlencoding::encode(&record.key).into_owned(),
            ),
            ("width".to_string(), thumbnail.width.to_string()),
            ("height".to_string(), thumbnail.height.to_string()),
        ];

        self.objects
            .put(
                &self.destination_bucket,
                &thumbnail_key,
                thumbnail.data.clone(),
                content_type_for(THUMBNAIL_FORMAT),
                object_metadata,
            )
            .await
            .map_err(|source| IngestError::Store {
                thumbnail_key: thumbnail_key.clone(),
                source,
            })?;

        let metadata_record = MetadataRecord::processed(&record.key, &thumbnail_key, now);
        self.metadata
            .put(&metadata_record)
            .await
            .map_err(|source| IngestError::MetadataWrite {
                key: record.key.clone(),
                source,
            })?;

        metrics::counter!("pictor.ingest.records.written").increment(1);
        metrics::histogram!("pictor.ingest.record.duration_seconds")
            .record(started.elapsed().as_secs_f64());

        info!(
            thumbnail_key = %thumbnail_key,
            source_size_bytes = source_size,
            thumbnail_size_bytes = thumbnail.data.len(),
            width = thumbnail.width,
            height = thumbnail.height,
            "Thumbnail stored"
        );

        Ok(RecordOutcome::Written { thumbnail_key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
    use pictor_storage::testing::{InMemoryMetadataStore, InMemoryObjectStore};
    use std::collections::BTreeSet;
    use std::io::Cursor;

    const NOW: i64 = 1_700_000_000;

    fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 77]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Jpeg(90))
            .unwrap();
        buf.into_inner()
    }

    struct Fixture {
        objects: Arc<InMemoryObjectStore>,
        metadata: Arc<InMemoryMetadataStore>,
        pipeline: IngestPipeline,
    }

    fn fixture() -> Fixture {
        let objects = Arc::new(InMemoryObjectStore::new());
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let pipeline = IngestPipeline::new(
            objects.clone(),
            metadata.clone(),
            ThumbnailTransform::default(),
            "thumbnails",
        );
        Fixture {
            objects,
            metadata,
            pipeline,
        }
    }

    #[test]
    fn test_is_image_key() {
        for key in [
            "a.jpg",
            "b.JPEG",
            "dir/c.png",
            "d.WebP",
            "e.bmp",
            "f.tiff",
            "g.tar.jpg",
        ] {
            assert!(is_image_key(key), "{key}");
        }
        for key in ["notes.txt", "a.gif", "a.tif", "jpg", "dir.jpg/", "a.jpg.bak", ""] {
            assert!(!is_image_key(key), "{key}");
        }
    }

    #[test]
    fn test_thumbnail_key_for() {
        assert_eq!(thumbnail_key_for("sample.jpg", 800), "resized/sample-800.jpg");
        assert_eq!(
            thumbnail_key_for("uploads/2024/cat.PNG", 800),
            "resized/cat-800.jpg"
        );
        assert_eq!(
            thumbnail_key_for("archive.tar.webp", 800),
            "resized/archive.tar-800.jpg"
        );
        assert_eq!(thumbnail_key_for("a b.bmp", 400), "resized/a b-400.jpg");
    }

    #[tokio::test]
    async fn test_jpg_upload_produces_thumbnail_and_record() {
        let f = fixture();
        f.objects.insert("uploads", "photos/sample.jpg", jpeg(1600, 1200));

        let outcome = f
            .pipeline
            .process_record_at(&TriggerRecord::new("uploads", "photos/sample.jpg"), NOW)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::Written {
                thumbnail_key: "resized/sample-800.jpg".to_string()
            }
        );
        assert_eq!(f.objects.keys("thumbnails"), vec!["resized/sample-800.jpg"]);

        let stored = f.objects.object("thumbnails", "resized/sample-800.jpg").unwrap();
        assert_eq!(stored.content_type, "image/jpeg");
        assert!(stored
            .metadata
            .contains(&("width".to_string(), "800".to_string())));
        assert!(stored
            .metadata
            .contains(&("height".to_string(), "600".to_string())));
        assert!(stored
            .metadata
            .contains(&("source-key".to_string(), "photos%2Fsample.jpg".to_string())));
        assert_eq!(
            image::guess_format(&stored.body).unwrap(),
            image::ImageFormat::Jpeg
        );

        let record = f.metadata.record("photos/sample.jpg").unwrap();
        assert_eq!(record.thumbnail_key, "resized/sample-800.jpg");
        assert_eq!(record.formats, BTreeSet::from(["jpg".to_string()]));
        assert_eq!(record.updated_at, NOW);
        assert_eq!(record.expires_at, Some(NOW + 7 * 24 * 3600));
    }

    #[tokio::test]
    async fn test_non_image_has_no_side_effects() {
        let f = fixture();
        f.objects.insert("uploads", "notes.txt", Bytes::from_static(b"hello"));

        let outcome = f
            .pipeline
            .process_record(&TriggerRecord::new("uploads", "notes.txt"))
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::FilteredOut);
        assert!(f.objects.keys("thumbnails").is_empty());
        assert_eq!(f.objects.put_calls(), 0);
        assert_eq!(f.metadata.put_calls(), 0);
        assert!(f.metadata.is_empty());
    }

    #[tokio::test]
    async fn test_generated_thumbnail_is_not_reprocessed() {
        let f = fixture();
        f.objects.insert("thumbnails", "resized/x-800.jpg", jpeg(800, 600));

        let outcome = f
            .pipeline
            .process_record(&TriggerRecord::new("thumbnails", "resized/x-800.jpg"))
            .await
            .unwrap();

        assert_eq!(outcome, RecordOutcome::FilteredOut);
        assert_eq!(f.objects.keys("thumbnails"), vec!["resized/x-800.jpg"]);
        assert_eq!(f.objects.put_calls(), 0);
        assert_eq!(f.metadata.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_shared_bucket_sources_are_processed() {
        let f = fixture();
        f.objects.insert("thumbnails", "originals/x.jpg", jpeg(100, 100));
        f.objects.insert("uploads", "resized/y.jpg", jpeg(100, 100));

        for record in [
            TriggerRecord::new("thumbnails", "originals/x.jpg"),
            TriggerRecord::new("uploads", "resized/y.jpg"),
        ] {
            assert!(matches!(
                f.pipeline.process_record_at(&record, NOW).await.unwrap(),
                RecordOutcome::Written { .. }
            ));
        }
        assert_eq!(f.metadata.len(), 2);
    }

    #[tokio::test]
    async fn test_reingest_is_idempotent() {
        let f = fixture();
        f.objects.insert("uploads", "sample.jpg", jpeg(900, 300));
        let record = TriggerRecord::new("uploads", "sample.jpg");

        f.pipeline.process_record_at(&record, NOW).await.unwrap();
        let first = f.metadata.record("sample.jpg").unwrap();
        let first_body = f.objects.object("thumbnails", "resized/sample-800.jpg").unwrap().body;

        f.pipeline.process_record_at(&record, NOW + 120).await.unwrap();
        let second = f.metadata.record("sample.jpg").unwrap();
        let second_body = f.objects.object("thumbnails", "resized/sample-800.jpg").unwrap().body;

        assert_eq!(f.objects.keys("thumbnails").len(), 1);
        assert_eq!(f.metadata.len(), 1);
        assert_eq!(first.source_key, second.source_key);
        assert_eq!(first.thumbnail_key, second.thumbnail_key);
        assert_eq!(first.formats, second.formats);
        assert_eq!(second.updated_at, NOW + 120);
        assert_eq!(first_body, second_body);
    }

    #[tokio::test]
    async fn test_missing_source_is_fetch_error() {
        let f = fixture();

        let err = f
            .pipeline
            .process_record(&TriggerRecord::new("uploads", "gone.png"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Fetch);
        assert_eq!(f.objects.put_calls(), 0);
        assert_eq!(f.metadata.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_transform_error() {
        let f = fixture();
        f.objects
            .insert("uploads", "broken.png", Bytes::from_static(b"\x89PNG garbage"));

        let err = f
            .pipeline
            .process_record(&TriggerRecord::new("uploads", "broken.png"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Transform);
        assert_eq!(f.objects.put_calls(), 0);
        assert_eq!(f.metadata.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_upload_failure_skips_metadata() {
        let f = fixture();
        f.objects.insert("uploads", "sample.jpg", jpeg(100, 100));
        f.objects.set_fail_puts(true);

        let err = f
            .pipeline
            .process_record(&TriggerRecord::new("uploads", "sample.jpg"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::Store);
        assert_eq!(f.metadata.put_calls(), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_tagged() {
        let f = fixture();
        f.objects.insert("uploads", "sample.jpg", jpeg(100, 100));
        f.metadata.set_fail_puts(true);

        let err = f
            .pipeline
            .process_record(&TriggerRecord::new("uploads", "sample.jpg"))
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Stage::MetadataWrite);
        assert!(f.objects.object("thumbnails", "resized/sample-800.jpg").is_some());
    }

    #[tokio::test]
    async fn test_batch_continues_after_failure() {
        let f = fixture();
        f.objects.insert("uploads", "one.jpg", jpeg(64, 64));
        f.objects.insert("uploads", "three.png", jpeg(64, 64));

        let report = f
            .pipeline
            .process_batch(vec![
                TriggerRecord::new("uploads", "one.jpg"),
                TriggerRecord::new("uploads", "missing.jpg"),
                TriggerRecord::new("uploads", "readme.txt"),
                TriggerRecord::new("uploads", "three.png"),
            ])
            .await;

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.written(), 2);
        assert_eq!(report.filtered_out(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_complete());
        assert!(report.results[1].1.is_err());

        assert_eq!(
            f.objects.keys("thumbnails"),
            vec!["resized/one-800.jpg", "resized/three-800.jpg"]
        );
        assert!(f.metadata.record("one.jpg").is_some());
        assert!(f.metadata.record("three.png").is_some());
    }

    #[tokio::test]
    async fn test_empty_batch_is_complete() {
        let f = fixture();
        let report = f.pipeline.process_batch(Vec::new()).await;
        assert!(report.is_complete());
        assert_eq!(report.written(), 0);
    }
}
