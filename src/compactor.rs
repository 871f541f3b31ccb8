use std::time::Duration;

use tracing::{debug, warn};

use crate::store::MemoryStore;

/// Background task: every `interval`, compact the WAL once it has grown by
/// `threshold` records, and drop idle lock and notify entries. The host
/// spawns it with `BookingConfig::compact_threshold` and `compact_interval`.
pub async fn run_compactor(store: MemoryStore, threshold: u64, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        compact_once(&store, threshold).await;
    }
}

/// One pass of the loop. Returns whether the WAL was rewritten.
pub async fn compact_once(store: &MemoryStore, threshold: u64) -> bool {
    let pruned = store.prune_idle();
    if pruned > 0 {
        debug!("pruned {pruned} idle locks");
    }

    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(_) => true,
        Err(e) => {
            warn!("compaction after {appends} appends failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use chrono::{NaiveTime, Weekday};

    use crate::engine::{ConflictPolicy, Engine};
    use crate::interval::TimeRange;
    use crate::store::{BookingView, LockKey, Store};

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("docket_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn window(h1: u32, h2: u32) -> TimeRange {
        TimeRange::new(
            NaiveTime::from_hms_opt(h1, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(h2, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let store = MemoryStore::open(path.clone(), Duration::from_secs(1)).unwrap();
        let engine = Engine::new(store.clone(), ConflictPolicy::default());
        let doctor = ulid::Ulid::new();

        let first = engine.add_schedule_entry(doctor, Weekday::Mon, window(9, 12)).await.unwrap();
        engine.add_schedule_entry(doctor, Weekday::Tue, window(9, 12)).await.unwrap();
        engine.remove_schedule_entry(first).await.unwrap();
        assert_eq!(store.appends_since_compact().await, 3);

        assert!(!compact_once(&store, 10).await);
        assert!(compact_once(&store, 3).await);
        assert_eq!(store.appends_since_compact().await, 0);

        // Snapshot holds only the surviving window.
        drop(engine);
        drop(store);
        let reopened = MemoryStore::open(path, Duration::from_secs(1)).unwrap();
        assert!(reopened.availability_for(doctor, Weekday::Mon).await.unwrap().is_empty());
        assert_eq!(
            reopened.availability_for(doctor, Weekday::Tue).await.unwrap(),
            vec![window(9, 12)]
        );
    }

    #[tokio::test]
    async fn prunes_released_locks() {
        let path = test_wal_path("prune.wal");
        let store = MemoryStore::open(path, Duration::from_secs(1)).unwrap();
        let tx = store.begin(vec![LockKey::Schedule(ulid::Ulid::new())]).await.unwrap();
        assert_eq!(store.lock_count(), 1);

        compact_once(&store, u64::MAX).await;
        assert_eq!(store.lock_count(), 1);

        drop(tx);
        compact_once(&store, u64::MAX).await;
        assert_eq!(store.lock_count(), 0);
    }
}
