mod availability;
mod conflict;
mod error;
mod ledger;
mod mutations;
mod queries;

pub use availability::free_slots;
pub use conflict::{check_appointment, check_batch, ConflictPolicy};
pub use error::{BookingError, Rejection};
pub use ledger::{check_payment, check_total_cost};

use std::future::Future;
use std::io;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::BookingConfig;
use crate::observability::{
    rejection_label, status_label, MUTATIONS_TOTAL, MUTATION_DURATION_SECONDS, REJECTIONS_TOTAL,
};
use crate::store::{MemoryStore, Store};

/// Booking Transaction Coordinator. Every mutation opens one scoped
/// transaction, runs the checkers inside it and commits only on acceptance.
pub struct Engine<S: Store> {
    store: S,
    policy: ConflictPolicy,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, policy: ConflictPolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }
}

impl Engine<MemoryStore> {
    /// Open (or replay) the WAL under `config.data_dir`.
    pub fn open(config: &BookingConfig) -> io::Result<Self> {
        let store = MemoryStore::from_config(config)?;
        Ok(Self::new(store, ConflictPolicy::from_config(config)))
    }
}

/// Record RED metrics and a debug line for one finished mutation.
async fn instrumented<T>(
    op: &'static str,
    fut: impl Future<Output = Result<T, BookingError>>,
) -> Result<T, BookingError> {
    let start = Instant::now();
    let result = fut.await;
    metrics::histogram!(MUTATION_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    metrics::counter!(MUTATIONS_TOTAL, "op" => op, "status" => status_label(&result)).increment(1);
    match &result {
        Ok(_) => debug!(op, "committed"),
        Err(BookingError::Rejected(r)) => {
            metrics::counter!(REJECTIONS_TOTAL, "reason" => rejection_label(r)).increment(1);
            debug!(op, reason = r.code(), "rejected: {r}");
        }
        Err(e) => debug!(op, "failed: {e}"),
    }
    result
}

/// Re-run `op` while it fails with a retryable error, at most `attempts`
/// times in total. Rejections and every other error return immediately.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, BookingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BookingError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, "retrying after {e}");
                attempt += 1;
            }
            other => return other,
        }
    }
}
