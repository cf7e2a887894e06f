use pictor_storage::{MetadataCache, StorageResult};
use tracing::instrument;

/// Resolve the thumbnail key recorded for a source key.
///
/// `Ok(None)` covers both a missing record and a record with an empty thumbnail key.
#[instrument(skip(metadata))]
pub async fn resolve_thumbnail_key(
    metadata: &MetadataCache,
    source_key: &str,
) -> StorageResult<Option<String>> {
    let record = metadata.get_metadata(source_key).await?;

    Ok(record
        .map(|r| r.thumbnail_key)
        .filter(|thumbnail_key| !thumbnail_key.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pictor_storage::metadata_store::MockMetadataStore;
    use pictor_storage::testing::InMemoryMetadataStore;
    use pictor_storage::{MetadataRecord, StorageError};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_resolves_thumbnail_key() {
        let store = Arc::new(InMemoryMetadataStore::new());
        store.insert(MetadataRecord::processed(
            "sample.jpg",
            "resized/sample-800.jpg",
            1_700_000_000,
        ));
        let metadata = MetadataCache::uncached(store);

        let key = resolve_thumbnail_key(&metadata, "sample.jpg").await.unwrap();
        assert_eq!(key.as_deref(), Some("resized/sample-800.jpg"));
    }

    #[tokio::test]
    async fn test_missing_and_empty_resolve_to_none() {
        let store = Arc::new(InMemoryMetadataStore::new());
        store.insert(MetadataRecord::processed("blank.png", "", 1_700_000_000));
        let metadata = MetadataCache::uncached(store);

        assert_eq!(resolve_thumbnail_key(&metadata, "absent.jpg").await.unwrap(), None);
        assert_eq!(resolve_thumbnail_key(&metadata, "blank.png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let mut store = MockMetadataStore::new();
        store.expect_get().returning(|_| {
            Err(StorageError::object_store("metadata.get", "connection reset"))
        });
        let metadata = MetadataCache::uncached(Arc::new(store));

        let err = resolve_thumbnail_key(&metadata, "sample.jpg")
            .await
            .unwrap_err();
        assert_eq!(err.operation(), "metadata.get");
    }
}
