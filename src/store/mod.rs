//! The seam between the booking engine and whatever owns persistence.
//!
//! The engine never touches storage directly. It opens a [`Transaction`]
//! scoped to a set of [`LockKey`]s, reads through [`BookingView`], stages
//! [`Event`]s, and commits. A store must guarantee that two transactions
//! sharing a key never interleave, and that a dropped transaction leaves no
//! trace.

mod memory;

pub use memory::{MemoryStore, MemoryTx};

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::interval::TimeRange;
use crate::model::{Appointment, Event, Payment};
use crate::schedule::ScheduleEntry;

/// Unit of mutual exclusion. The derived `Ord` is the global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// A doctor's recurring weekly windows.
    Schedule(Ulid),
    /// Every appointment of one doctor on one date.
    DoctorDay(Ulid, NaiveDate),
    /// Every appointment in one room on one date.
    RoomDay(Ulid, NaiveDate),
    /// One appointment row together with its payment ledger.
    Appointment(Ulid),
}

#[derive(Debug)]
pub enum StoreError {
    /// The bounded lock wait elapsed.
    LockTimeout(LockKey),
    /// The store detected a serialization failure; retry the whole operation.
    Serialization(String),
    /// Transient infrastructure failure.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::LockTimeout(key) => write!(f, "lock wait timed out on {key:?}"),
            StoreError::Serialization(msg) => write!(f, "serialization failure: {msg}"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Read queries the checkers run. Implemented by stores (committed snapshot)
/// and by transactions (state under the transaction's locks).
#[async_trait]
pub trait BookingView: Send + Sync {
    async fn appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError>;

    async fn appointments_for_doctor(
        &self,
        doctor_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Appointment>, StoreError>;

    async fn appointments_for_room(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Appointment>, StoreError>;

    /// Schedule Index: every recurring window of `doctor_id` on `weekday`.
    async fn availability_for(
        &self,
        doctor_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<TimeRange>, StoreError>;

    async fn schedule_entry(&self, id: Ulid) -> Result<Option<ScheduleEntry>, StoreError>;

    /// Number of windows a doctor holds across the week.
    async fn schedule_size(&self, doctor_id: Ulid) -> Result<usize, StoreError>;

    async fn payment(&self, id: Ulid) -> Result<Option<Payment>, StoreError>;

    async fn payments_for(&self, appointment_id: Ulid) -> Result<Vec<Payment>, StoreError>;

    async fn total_cost(&self, appointment_id: Ulid) -> Result<Option<Decimal>, StoreError>;
}

#[async_trait]
pub trait Transaction: BookingView {
    /// Queue a change. Nothing is visible to anyone until `commit`.
    fn stage(&mut self, event: Event);

    /// Make every staged event durable and visible as one unit, then release
    /// the locks. Dropping without committing discards the staged events.
    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Store: BookingView {
    type Tx: Transaction;

    /// Open a transaction holding every key in `scope`. Keys may arrive
    /// unsorted and duplicated. Waiting is bounded; a timeout is
    /// `StoreError::LockTimeout`.
    async fn begin(&self, scope: Vec<LockKey>) -> Result<Self::Tx, StoreError>;
}
