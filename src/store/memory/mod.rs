mod tables;
mod tx;

pub use tx::MemoryTx;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};
use ulid::Ulid;

use self::tables::Tables;
use super::{LockKey, StoreError};
use crate::config::BookingConfig;
use crate::model::Event;
use crate::notify::NotifyHub;
use crate::observability::{LOCK_TIMEOUTS_TOTAL, WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

type Response = oneshot::Sender<io::Result<()>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        events: Vec<Event>,
        response: Response,
    },
    Compact {
        records: Vec<Vec<Event>>,
        response: Response,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
/// A non-append command ends the batch; it runs after the batch is flushed.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            warn!("WAL flush of {} records failed: {e}", batch.len());
        }
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("WAL writer stopped");
}

/// Write and fsync every record of the batch, or none of them: on any error
/// the log is cut back to where the batch started.
fn flush_batch(wal: &mut Wal, batch: &[(Vec<Event>, Response)]) -> io::Result<()> {
    let result = batch
        .iter()
        .try_for_each(|(events, _)| wal.append_buffered(events))
        .and_then(|()| wal.flush_sync());
    if result.is_err() {
        if let Err(e) = wal.rollback() {
            warn!("WAL rollback failed: {e}");
        }
    }
    result
}

fn respond_batch(batch: Vec<(Vec<Event>, Response)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { records, response } => {
            let result = Wal::write_compact_file(wal.path(), &records)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            let batch = vec![(events, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

// ── Shared state ─────────────────────────────────────────

struct Shared {
    tables: Tables,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
    /// Reads take it shared, applying a commit takes it exclusively, so a
    /// reader never sees half a transaction.
    gate: RwLock<()>,
    /// Commits take it shared, compaction exclusively.
    commits: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: NotifyHub,
}

impl Shared {
    async fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let _gate = self.gate.read().await;
        f(&self.tables)
    }

    /// Acquire every key in global order. The timeout bounds the whole scope,
    /// not each key.
    async fn acquire(
        &self,
        mut scope: Vec<LockKey>,
    ) -> Result<Vec<OwnedMutexGuard<()>>, StoreError> {
        scope.sort_unstable();
        scope.dedup();
        let deadline = tokio::time::Instant::now() + self.lock_timeout;
        let mut guards = Vec::with_capacity(scope.len());
        for key in scope {
            let lock = self.locks.entry(key).or_default().clone();
            match tokio::time::timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    metrics::counter!(LOCK_TIMEOUTS_TOTAL).increment(1);
                    warn!(?key, "lock wait timed out");
                    return Err(StoreError::LockTimeout(key));
                }
            }
        }
        Ok(guards)
    }

    async fn wal_append(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    /// WAL append, apply, notify. The caller still holds its scope locks.
    async fn commit(&self, events: Vec<Event>) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let _commit = self.commits.read().await;
        self.wal_append(events.clone()).await?;
        {
            let _gate = self.gate.write().await;
            for event in &events {
                self.tables.apply(event);
            }
        }
        self.notify.publish(&events);
        Ok(())
    }
}

/// Event-sourced store: every commit is one WAL record, state lives in
/// dashmap tables rebuilt by replay on open.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Replay the log at `wal_path` and start its writer task. Must be called
    /// inside a tokio runtime.
    pub fn open(wal_path: PathBuf, lock_timeout: Duration) -> io::Result<Self> {
        let (wal, records) = Wal::recover(&wal_path)?;

        let tables = Tables::default();
        for record in &records {
            for event in record {
                tables.apply(event);
            }
        }
        info!(
            "replayed {} commit records from {}: {} appointments, {} payments",
            records.len(),
            wal_path.display(),
            tables.appointment_count(),
            tables.payment_count(),
        );

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            shared: Arc::new(Shared {
                tables,
                locks: DashMap::new(),
                lock_timeout,
                gate: RwLock::new(()),
                commits: RwLock::new(()),
                wal_tx,
                notify: NotifyHub::new(),
            }),
        })
    }

    pub fn from_config(config: &BookingConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Self::open(config.wal_path(), config.lock_timeout)
    }

    /// Committed events for one doctor (appointments, windows) or one
    /// appointment (payments).
    pub fn subscribe(&self, topic: Ulid) -> broadcast::Receiver<Event> {
        self.shared.notify.subscribe(topic)
    }

    /// Rewrite the WAL as a minimal snapshot of current state. Commits wait
    /// until the swap is done.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _commits = self.shared.commits.write().await;
        let records = self.shared.read(Tables::snapshot).await;
        let count = records.len();

        let (tx, rx) = oneshot::channel();
        self.shared
            .wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!("compacted WAL to {count} records");
        Ok(count)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .shared
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Drop lock entries nobody holds or waits on, and notify channels nobody
    /// listens to. Returns the number of locks removed.
    pub fn prune_idle(&self) -> usize {
        let before = self.shared.locks.len();
        self.shared.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        self.shared.notify.prune();
        before.saturating_sub(self.shared.locks.len())
    }

    pub fn lock_count(&self) -> usize {
        self.shared.locks.len()
    }

    pub async fn appointment_count(&self) -> usize {
        self.shared.read(Tables::appointment_count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveTime, Weekday};

    use crate::interval::TimeRange;
    use crate::schedule::ScheduleEntry;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("docket_test_memory");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn window_added(doctor_id: Ulid) -> Event {
        Event::ScheduleEntryAdded {
            entry: ScheduleEntry {
                id: Ulid::new(),
                doctor_id,
                weekday: Weekday::Mon,
                window: TimeRange::new(
                    NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                    NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
                ),
            },
        }
    }

    fn pending(events: Vec<Event>) -> (Vec<Event>, Response, oneshot::Receiver<io::Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (events, tx, rx)
    }

    #[test]
    fn failed_batch_persists_nothing() {
        let path = test_wal_path("failed_batch.wal");
        let doctor = Ulid::new();
        let committed = vec![window_added(doctor)];
        let later = vec![window_added(doctor)];

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&committed).unwrap();
        let one_record = std::fs::metadata(&path).unwrap().len() as usize;
        // One event fits, ten do not.
        wal.set_record_limit(one_record);

        let (a, a_tx, mut a_rx) = pending(vec![window_added(doctor)]);
        let (b, b_tx, mut b_rx) = pending((0..10).map(|_| window_added(doctor)).collect());
        let batch = vec![(a, a_tx), (b, b_tx)];
        let result = flush_batch(&mut wal, &batch);
        assert!(result.is_err());
        respond_batch(batch, &result);
        assert!(a_rx.try_recv().unwrap().is_err());
        assert!(b_rx.try_recv().unwrap().is_err());

        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, one_record);
        let (c, c_tx, _c_rx) = pending(later.clone());
        flush_batch(&mut wal, &[(c, c_tx)]).unwrap();
        assert_eq!(wal.appends_since_compact(), 2);
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), vec![committed, later]);
        let _ = std::fs::remove_file(&path);
    }
}
