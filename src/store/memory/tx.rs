use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Weekday};
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;
use ulid::Ulid;

use super::{MemoryStore, Shared};
use crate::interval::TimeRange;
use crate::model::{Appointment, Event, Payment};
use crate::schedule::ScheduleEntry;
use crate::store::{BookingView, LockKey, Store, StoreError, Transaction};

/// Holds its scope locks until committed or dropped.
pub struct MemoryTx {
    shared: Arc<Shared>,
    staged: Vec<Event>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl MemoryTx {
    pub fn staged(&self) -> &[Event] {
        &self.staged
    }
}

/// Both the store and its transactions read committed state; a transaction
/// is consistent because its locks keep writers to its scope out.
macro_rules! view_via_shared {
    ($ty:ty) => {
        #[async_trait]
        impl BookingView for $ty {
            async fn appointment(&self, id: Ulid) -> Result<Option<Appointment>, StoreError> {
                Ok(self.shared.read(|t| t.appointment(id)).await)
            }

            async fn appointments_for_doctor(
                &self,
                doctor_id: Ulid,
                date: NaiveDate,
                exclude: Option<Ulid>,
            ) -> Result<Vec<Appointment>, StoreError> {
                Ok(self.shared.read(|t| t.for_doctor(doctor_id, date, exclude)).await)
            }

            async fn appointments_for_room(
                &self,
                room_id: Ulid,
                date: NaiveDate,
                exclude: Option<Ulid>,
            ) -> Result<Vec<Appointment>, StoreError> {
                Ok(self.shared.read(|t| t.for_room(room_id, date, exclude)).await)
            }

            async fn availability_for(
                &self,
                doctor_id: Ulid,
                weekday: Weekday,
            ) -> Result<Vec<TimeRange>, StoreError> {
                Ok(self.shared.read(|t| t.windows(doctor_id, weekday)).await)
            }

            async fn schedule_entry(&self, id: Ulid) -> Result<Option<ScheduleEntry>, StoreError> {
                Ok(self.shared.read(|t| t.schedule_entry(id)).await)
            }

            async fn schedule_size(&self, doctor_id: Ulid) -> Result<usize, StoreError> {
                Ok(self.shared.read(|t| t.schedule_size(doctor_id)).await)
            }

            async fn payment(&self, id: Ulid) -> Result<Option<Payment>, StoreError> {
                Ok(self.shared.read(|t| t.payment(id)).await)
            }

            async fn payments_for(&self, appointment_id: Ulid) -> Result<Vec<Payment>, StoreError> {
                Ok(self.shared.read(|t| t.payments_for(appointment_id)).await)
            }

            async fn total_cost(
                &self,
                appointment_id: Ulid,
            ) -> Result<Option<Decimal>, StoreError> {
                Ok(self
                    .shared
                    .read(|t| t.appointment(appointment_id).map(|a| a.total_cost))
                    .await)
            }
        }
    };
}

view_via_shared!(MemoryStore);
view_via_shared!(MemoryTx);

#[async_trait]
impl Transaction for MemoryTx {
    fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx { shared, staged, _guards } = self;
        shared.commit(staged).await
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self, scope: Vec<LockKey>) -> Result<MemoryTx, StoreError> {
        let guards = self.shared.acquire(scope).await?;
        Ok(MemoryTx {
            shared: Arc::clone(&self.shared),
            staged: Vec::new(),
            _guards: guards,
        })
    }
}
