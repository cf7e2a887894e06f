//! Pictor Ingest
//!
//! Turns uploaded source images into thumbnails and metadata records.
//!
//! # Architecture
//!
//! ```text
//! Bucket notification (Kafka) -> NotificationConsumer -> IngestPipeline
//!                                                          │
//!                     source bucket ── get ────────────────┤
//!                                                          ├─ ThumbnailTransform
//!                     destination bucket ◀── put ──────────┤
//!                     metadata store ◀── upsert ───────────┘
//! ```
//!
//! A [`retention::RetentionSweeper`] deletes records past their retention expiry.

pub mod config;
pub mod consumer;
pub mod pipeline;
pub mod retention;
pub mod transform;
pub mod trigger;

pub use config::IngestConfig;
pub use consumer::{DeliveryTracker, NotificationConsumer, RedeliveryPolicy, Settlement};
pub use pipeline::{BatchReport, IngestError, IngestPipeline, RecordOutcome, Stage};
pub use retention::RetentionSweeper;
pub use transform::{ThumbnailTransform, TransformError};
pub use trigger::TriggerRecord;
