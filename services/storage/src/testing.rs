//! In-memory store fakes with call accounting, for unit tests in this and the
//! service crates.

use crate::cache::{CacheLookup, CacheStore};
use crate::error::{CacheError, StorageError, StorageResult};
use crate::metadata_store::MetadataStore;
use crate::object_store::{ObjectMetadata, ObjectStore};
use crate::record::MetadataRecord;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<HashMap<String, MetadataRecord>>,
    get_calls: AtomicUsize,
    put_calls: AtomicUsize,
    fail_puts: AtomicBool,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without counting a put
    pub fn insert(&self, record: MetadataRecord) {
        self.records.lock().insert(record.source_key.clone(), record);
    }

    pub fn record(&self, source_key: &str) -> Option<MetadataRecord> {
        self.records.lock().get(source_key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get(&self, source_key: &str) -> StorageResult<Option<MetadataRecord>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(source_key))
    }

    async fn put(&self, record: &MetadataRecord) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::InvalidRecord {
                operation: "metadata.put",
                message: "write rejected".to_string(),
            });
        }
        self.insert(record.clone());
        Ok(())
    }

    async fn delete_expired(&self, now: i64) -> StorageResult<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| r.expires_at.map_or(true, |expiry| expiry > now));
        Ok((before - records.len()) as u64)
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// A stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    put_calls: AtomicUsize,
    fail_puts: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.into(),
                content_type: "application/octet-stream".to_string(),
                metadata: Vec::new(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.object(bucket, key)
            .map(|o| o.body)
            .ok_or_else(|| StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::object_store("object.put", "upload rejected"));
        }
        self.objects.lock().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn presign(&self, bucket: &str, key: &str, expiry: Duration) -> StorageResult<String> {
        Ok(format!(
            "https://{}.objects.test/{}?expires={}",
            bucket,
            key,
            expiry.as_secs()
        ))
    }
}

#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, (String, u64)>>,
    set_calls: AtomicUsize,
    unavailable: AtomicBool,
    fail_writes: AtomicBool,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry without counting a set
    pub fn seed(&self, key: &str, value: &str, ttl_secs: u64) {
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), ttl_secs));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn ttl_of(&self, key: &str) -> Option<u64> {
        self.entries.lock().get(key).map(|(_, ttl)| *ttl)
    }

    pub fn set_calls(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    /// Every read reports the cache as unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> CacheLookup {
        if self.unavailable.load(Ordering::SeqCst) {
            return CacheLookup::Unavailable(CacheError::Connection("cache offline".to_string()));
        }
        match self.entries.lock().get(key) {
            Some((value, _)) => CacheLookup::Hit(value.clone()),
            None => CacheLookup::Miss,
        }
    }

    async fn set_with_ttl(&self, key: &str, ttl_secs: u64, value: &str) -> Result<(), CacheError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) || self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout(300));
        }
        self.seed(key, value, ttl_secs);
        Ok(())
    }
}
