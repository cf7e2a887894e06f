//! Pictor Storage
//!
//! Storage adapters shared by the Pictor thumbnail services: the durable metadata
//! store (PostgreSQL), the object store (S3) and the optional cache-aside layer
//! (Redis) that fronts metadata lookups on the read path.
//!
//! ## Architecture
//!
//! ```text
//!   reader                           ingest
//!     │                                │
//!     ▼                                │
//! ┌──────────────┐   miss   ┌──────────▼───┐
//! │ Metadata     │─────────▶│ Metadata     │  PostgreSQL, system of record
//! │ Cache        │◀─────────│ Store        │
//! └──────────────┘ write    └──────────────┘
//!     │ meta:<key>
//!     │ meta404:<key>        ┌──────────────┐
//!     ▼                      │ Object       │  S3, sources + thumbnails
//!   Redis                    │ Store        │
//!                            └──────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod keys;
pub mod metadata_store;
pub mod object_store;
pub mod record;
pub mod ttl;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::{CacheLookup, CacheStore, MetadataCache, RedisCacheStore};
pub use config::{CacheConfig, DatabaseConfig, S3Config};
pub use error::{CacheError, StorageError, StorageResult};
pub use keys::CacheKey;
pub use metadata_store::{MetadataStore, PgMetadataStore};
pub use object_store::{content_type_for, ObjectMetadata, ObjectStore, S3ObjectStore};
pub use record::MetadataRecord;
pub use ttl::derive_cache_ttl;
