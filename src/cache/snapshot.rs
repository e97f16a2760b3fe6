//! Snapshot adapter between the cache and the durable side store.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, warn};

use crate::application::error::SyncError;
use crate::application::repos::{SideStore, SideStoreError};
use crate::domain::entities::{SnapshotRecord, UserProfile};

use super::clock::Clock;

const METRIC_SNAPSHOT_HIT_TOTAL: &str = "rollcall_snapshot_hit_total";
const METRIC_SNAPSHOT_EXPIRED_TOTAL: &str = "rollcall_snapshot_expired_total";

/// Reads and writes TTL-bounded profile snapshots.
pub(crate) struct SnapshotAdapter {
    store: Arc<dyn SideStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SnapshotAdapter {
    pub(crate) fn new(store: Arc<dyn SideStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Load a fresh snapshot for `id`.
    ///
    /// Records older than the TTL, records filed under another id, records
    /// holding a failed profile and unreadable records all count as absent.
    pub(crate) async fn load(&self, id: &str) -> Option<UserProfile> {
        let record = match self.store.read(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(err) => {
                warn!(profile_id = id, error = %err, "Snapshot read failed; treating as absent");
                return None;
            }
        };

        if self.is_expired(&record) {
            debug!(
                profile_id = id,
                cached_at_epoch_ms = record.cached_at_epoch_ms,
                "Snapshot expired"
            );
            counter!(METRIC_SNAPSHOT_EXPIRED_TOTAL).increment(1);
            return None;
        }

        if record.entity.id != id || !record.entity.is_persistable() {
            warn!(
                profile_id = id,
                stored_id = %record.entity.id,
                "Ignoring unusable snapshot"
            );
            return None;
        }

        counter!(METRIC_SNAPSHOT_HIT_TOTAL).increment(1);
        Some(record.entity)
    }

    pub(crate) async fn save(&self, profile: &UserProfile) -> Result<(), SyncError> {
        let record = SnapshotRecord {
            entity: profile.clone(),
            cached_at_epoch_ms: self.clock.now_epoch_ms(),
        };
        self.store
            .write(&profile.id, record)
            .await
            .map_err(|err| SyncError::PersistenceWriteFailure {
                id: profile.id.clone(),
                message: err.to_string(),
            })
    }

    pub(crate) async fn clear(&self) -> Result<(), SideStoreError> {
        self.store.clear().await
    }

    /// Strictly older than the TTL. Timestamps in the future count as fresh.
    fn is_expired(&self, record: &SnapshotRecord) -> bool {
        let age_ms = self.clock.now_epoch_ms() - record.cached_at_epoch_ms;
        age_ms > 0 && age_ms as u128 > self.ttl.as_millis()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cache::clock::ManualClock;

    #[derive(Default)]
    struct MapStore {
        records: Mutex<HashMap<String, SnapshotRecord>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl SideStore for MapStore {
        async fn read(&self, id: &str) -> Result<Option<SnapshotRecord>, SideStoreError> {
            Ok(self.records.lock().expect("records lock").get(id).cloned())
        }

        async fn write(&self, id: &str, record: SnapshotRecord) -> Result<(), SideStoreError> {
            if self.fail_writes {
                return Err(SideStoreError::Io(std::io::Error::other("disk full")));
            }
            self.records
                .lock()
                .expect("records lock")
                .insert(id.to_string(), record);
            Ok(())
        }

        async fn clear(&self) -> Result<(), SideStoreError> {
            self.records.lock().expect("records lock").clear();
            Ok(())
        }
    }

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn profile(id: &str) -> UserProfile {
        UserProfile {
            username: Some("mira".to_string()),
            ..UserProfile::placeholder(id)
        }
    }

    fn adapter(store: Arc<MapStore>, clock: Arc<ManualClock>) -> SnapshotAdapter {
        SnapshotAdapter::new(store, clock, DAY)
    }

    #[tokio::test]
    async fn snapshot_is_fresh_up_to_the_ttl() {
        let store = Arc::new(MapStore::default());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let snapshots = adapter(Arc::clone(&store), Arc::clone(&clock));

        snapshots.save(&profile("1")).await.expect("write succeeds");

        clock.advance(DAY);
        assert_eq!(snapshots.load("1").await, Some(profile("1")));

        clock.advance(Duration::from_millis(1));
        assert_eq!(snapshots.load("1").await, None);
    }

    #[tokio::test]
    async fn mismatched_and_failed_records_are_ignored() {
        let store = Arc::new(MapStore::default());
        let clock = Arc::new(ManualClock::new(0));
        store.records.lock().expect("records lock").insert(
            "1".to_string(),
            SnapshotRecord {
                entity: profile("2"),
                cached_at_epoch_ms: 0,
            },
        );
        store.records.lock().expect("records lock").insert(
            "3".to_string(),
            SnapshotRecord {
                entity: UserProfile::failed("3", "boom"),
                cached_at_epoch_ms: 0,
            },
        );
        let snapshots = adapter(store, clock);

        assert_eq!(snapshots.load("1").await, None);
        assert_eq!(snapshots.load("3").await, None);
    }

    #[tokio::test]
    async fn write_failures_map_to_persistence_errors() {
        let store = Arc::new(MapStore {
            fail_writes: true,
            ..MapStore::default()
        });
        let snapshots = adapter(store, Arc::new(ManualClock::new(0)));

        let err = snapshots.save(&profile("1")).await.expect_err("write fails");
        assert_eq!(err.kind(), "persistence_write_failure");
    }
}
