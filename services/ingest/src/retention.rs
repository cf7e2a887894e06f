//! Periodic deletion of metadata records past their retention expiry.

use chrono::Utc;
use pictor_storage::{MetadataStore, StorageResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct RetentionSweeper {
    store: Arc<dyn MetadataStore>,
    interval: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn MetadataStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Delete records that expired at or before `now`.
    pub async fn sweep_once(&self, now: i64) -> StorageResult<u64> {
        let deleted = self.store.delete_expired(now).await?;
        metrics::counter!("pictor.ingest.retention.deleted").increment(deleted);
        Ok(deleted)
    }

    /// Sweep every interval until cancelled. Failures are logged and retried on the
    /// next tick.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Starting retention sweeper");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now().timestamp()).await {
                        error!(operation = e.operation(), error = %e, "Retention sweep failed");
                    }
                }
            }
        }

        info!("Retention sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pictor_storage::metadata_store::MockMetadataStore;
    use pictor_storage::testing::InMemoryMetadataStore;
    use pictor_storage::MetadataRecord;

    const NOW: i64 = 1_700_000_000;

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut expired = MetadataRecord::processed("old.jpg", "resized/old-800.jpg", NOW);
        expired.expires_at = Some(NOW - 1);
        let mut boundary = MetadataRecord::processed("edge.jpg", "resized/edge-800.jpg", NOW);
        boundary.expires_at = Some(NOW);
        let mut unbounded = MetadataRecord::processed("keep.jpg", "resized/keep-800.jpg", NOW);
        unbounded.expires_at = None;
        store.insert(expired);
        store.insert(boundary);
        store.insert(unbounded);
        store.insert(MetadataRecord::processed("new.jpg", "resized/new-800.jpg", NOW));

        let sweeper = RetentionSweeper::new(store.clone(), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once(NOW).await.unwrap(), 2);

        assert!(store.record("old.jpg").is_none());
        assert!(store.record("edge.jpg").is_none());
        assert!(store.record("keep.jpg").is_some());
        assert!(store.record("new.jpg").is_some());
    }

    #[tokio::test]
    async fn test_sweep_passes_now_through() {
        let mut store = MockMetadataStore::new();
        store
            .expect_delete_expired()
            .withf(|now| *now == NOW)
            .times(1)
            .returning(|_| Ok(7));

        let sweeper = RetentionSweeper::new(Arc::new(store), Duration::from_secs(60));
        tokio_test::assert_ok!(sweeper.sweep_once(NOW).await);
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let mut store = MockMetadataStore::new();
        store.expect_delete_expired().never();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        RetentionSweeper::new(Arc::new(store), Duration::from_secs(3600))
            .run(shutdown)
            .await;
    }
}
