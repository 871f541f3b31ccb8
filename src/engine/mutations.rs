use chrono::{Utc, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::interval::TimeRange;
use crate::limits::*;
use crate::model::*;
use crate::schedule::ScheduleEntry;
use crate::store::{BookingView, LockKey, Store, Transaction};

use super::conflict::{check_appointment, check_batch};
use super::ledger::{check_payment, check_total_cost};
use super::{instrumented, BookingError, Engine};

/// Every key a write to `a` must hold: the doctor's windows, the doctor's
/// day, the room's day and the row itself.
pub(super) fn lock_scope(a: &Appointment) -> Vec<LockKey> {
    let mut scope = vec![
        LockKey::Schedule(a.doctor_id),
        LockKey::DoctorDay(a.doctor_id, a.date),
        LockKey::Appointment(a.id),
    ];
    if let Some(room_id) = a.room_id {
        scope.push(LockKey::RoomDay(room_id, a.date));
    }
    scope
}

pub(super) fn validate_request(request: &AppointmentRequest) -> Result<TimeRange, BookingError> {
    let time = TimeRange::checked(request.start, request.end)
        .ok_or(BookingError::InvalidRequest("end must be after start"))?;
    validate_money(request.total_cost)?;
    Ok(time)
}

fn validate_money(amount: Decimal) -> Result<(), BookingError> {
    if amount < Decimal::ZERO {
        return Err(BookingError::InvalidRequest("amount must not be negative"));
    }
    if amount > Decimal::from(MAX_MONEY_UNITS) {
        return Err(BookingError::LimitExceeded("amount too large"));
    }
    Ok(())
}

pub(super) fn new_appointment(
    id: Ulid,
    request: &AppointmentRequest,
    time: TimeRange,
) -> Appointment {
    Appointment {
        id,
        doctor_id: request.doctor_id,
        patient_id: request.patient_id,
        clinic_id: request.clinic_id,
        room_id: request.room_id,
        date: request.date,
        time,
        total_cost: request.total_cost,
        status: AppointmentStatus::Scheduled,
    }
}

/// Re-read `id` under the transaction's locks and make sure it still sits
/// in the scope that was locked for it.
async fn reread_locked<T: Transaction>(
    tx: &T,
    expected: &Appointment,
) -> Result<Appointment, BookingError> {
    let current = tx
        .appointment(expected.id)
        .await?
        .ok_or(BookingError::NotFound(expected.id))?;
    if current.doctor_id != expected.doctor_id
        || current.date != expected.date
        || current.room_id != expected.room_id
    {
        return Err(BookingError::ConcurrencyConflict(format!(
            "appointment {} moved while acquiring locks",
            expected.id
        )));
    }
    Ok(current)
}

impl<S: Store> Engine<S> {
    // ── Appointments ─────────────────────────────────────────

    pub async fn create_appointment(
        &self,
        request: AppointmentRequest,
    ) -> Result<Ulid, BookingError> {
        instrumented("create_appointment", async {
            let time = validate_request(&request)?;
            let appointment = new_appointment(Ulid::new(), &request, time);

            let mut tx = self.store.begin(lock_scope(&appointment)).await?;
            check_appointment(&tx, &appointment, None, &self.policy).await?;

            let id = appointment.id;
            tx.stage(Event::AppointmentBooked { appointment });
            tx.commit().await?;
            Ok(id)
        })
        .await
    }

    /// Book several appointments atomically. All-or-nothing: if any of them
    /// is rejected (against the store or against another member of the
    /// batch), none is committed. Ids come back in request order.
    pub async fn create_appointments(
        &self,
        requests: Vec<AppointmentRequest>,
    ) -> Result<Vec<Ulid>, BookingError> {
        instrumented("create_appointments", async {
            if requests.is_empty() {
                return Ok(Vec::new());
            }
            if requests.len() > MAX_BATCH_SIZE {
                return Err(BookingError::LimitExceeded("batch too large"));
            }
            let proposed = requests
                .iter()
                .map(|r| validate_request(r).map(|time| new_appointment(Ulid::new(), r, time)))
                .collect::<Result<Vec<_>, _>>()?;

            let scope = proposed.iter().flat_map(lock_scope).collect();
            let mut tx = self.store.begin(scope).await?;

            check_batch(&tx, &proposed, &self.policy).await?;

            let ids: Vec<Ulid> = proposed.iter().map(|a| a.id).collect();
            for appointment in proposed {
                tx.stage(Event::AppointmentBooked { appointment });
            }
            tx.commit().await?;
            Ok(ids)
        })
        .await
    }

    /// Reschedule or re-price a Scheduled appointment. The status is kept.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        request: AppointmentRequest,
    ) -> Result<(), BookingError> {
        instrumented("update_appointment", async {
            let time = validate_request(&request)?;
            let before = self.store.appointment(id).await?.ok_or(BookingError::NotFound(id))?;
            let mut updated = new_appointment(id, &request, time);

            let mut scope = lock_scope(&before);
            scope.extend(lock_scope(&updated));
            let mut tx = self.store.begin(scope).await?;

            let current = reread_locked(&tx, &before).await?;
            if current.status != AppointmentStatus::Scheduled {
                return Err(BookingError::InvalidRequest(
                    "only scheduled appointments can be rescheduled",
                ));
            }
            updated.status = current.status;

            check_appointment(&tx, &updated, Some(id), &self.policy).await?;
            if updated.total_cost < current.total_cost {
                check_total_cost(&tx, id, updated.total_cost).await?;
            }

            tx.stage(Event::AppointmentUpdated { appointment: updated });
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Move an appointment to another status. Only Scheduled may change;
    /// repeating the current status is a no-op. The time slot is untouched,
    /// so the conflict checker does not run.
    pub async fn set_status(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<(), BookingError> {
        instrumented("set_status", async {
            let before = self.store.appointment(id).await?.ok_or(BookingError::NotFound(id))?;
            let mut tx = self.store.begin(lock_scope(&before)).await?;

            let current = reread_locked(&tx, &before).await?;
            if !current.status.can_transition_to(status) {
                return Err(BookingError::InvalidRequest("status transition not allowed"));
            }
            if current.status == status {
                return Ok(());
            }

            tx.stage(Event::AppointmentUpdated {
                appointment: Appointment { status, ..current },
            });
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Remove the appointment and every payment recorded against it.
    pub async fn delete_appointment(&self, id: Ulid) -> Result<(), BookingError> {
        instrumented("delete_appointment", async {
            let before = self.store.appointment(id).await?.ok_or(BookingError::NotFound(id))?;
            let mut tx = self.store.begin(lock_scope(&before)).await?;
            let current = reread_locked(&tx, &before).await?;

            tx.stage(Event::AppointmentDeleted {
                id,
                doctor_id: current.doctor_id,
            });
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    // ── Payments ─────────────────────────────────────────────

    pub async fn record_payment(
        &self,
        appointment_id: Ulid,
        amount: Decimal,
        method: PaymentMethod,
    ) -> Result<Ulid, BookingError> {
        instrumented("record_payment", async {
            validate_money(amount)?;
            let mut tx = self.store.begin(vec![LockKey::Appointment(appointment_id)]).await?;
            if tx.appointment(appointment_id).await?.is_none() {
                return Err(BookingError::NotFound(appointment_id));
            }
            if tx.payments_for(appointment_id).await?.len() >= MAX_PAYMENTS_PER_APPOINTMENT {
                return Err(BookingError::LimitExceeded("too many payments on appointment"));
            }
            check_payment(&tx, appointment_id, amount, None).await?;

            let payment = Payment {
                id: Ulid::new(),
                appointment_id,
                amount,
                method,
                paid_at: Utc::now(),
            };
            let id = payment.id;
            tx.stage(Event::PaymentRecorded { payment });
            tx.commit().await?;
            Ok(id)
        })
        .await
    }

    pub async fn update_payment(
        &self,
        payment_id: Ulid,
        new_amount: Decimal,
    ) -> Result<(), BookingError> {
        instrumented("update_payment", async {
            validate_money(new_amount)?;
            let before = self
                .store
                .payment(payment_id)
                .await?
                .ok_or(BookingError::NotFound(payment_id))?;
            let mut tx = self.store.begin(vec![LockKey::Appointment(before.appointment_id)]).await?;
            let prior = tx.payment(payment_id).await?.ok_or(BookingError::NotFound(payment_id))?;

            check_payment(&tx, prior.appointment_id, new_amount, Some(prior.amount)).await?;

            tx.stage(Event::PaymentUpdated {
                id: payment_id,
                appointment_id: prior.appointment_id,
                amount: new_amount,
            });
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Void a payment. Lowering the paid sum can never overpay, so this is
    /// never rejected.
    pub async fn delete_payment(&self, payment_id: Ulid) -> Result<(), BookingError> {
        instrumented("delete_payment", async {
            let before = self
                .store
                .payment(payment_id)
                .await?
                .ok_or(BookingError::NotFound(payment_id))?;
            let mut tx = self.store.begin(vec![LockKey::Appointment(before.appointment_id)]).await?;
            if tx.payment(payment_id).await?.is_none() {
                return Err(BookingError::NotFound(payment_id));
            }

            tx.stage(Event::PaymentDeleted {
                id: payment_id,
                appointment_id: before.appointment_id,
            });
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    // ── Schedules ────────────────────────────────────────────

    /// Add a recurring weekly window. Windows may overlap each other.
    pub async fn add_schedule_entry(
        &self,
        doctor_id: Ulid,
        weekday: Weekday,
        window: TimeRange,
    ) -> Result<Ulid, BookingError> {
        instrumented("add_schedule_entry", async {
            let window = TimeRange::checked(window.start, window.end)
                .ok_or(BookingError::InvalidRequest("end must be after start"))?;
            let mut tx = self.store.begin(vec![LockKey::Schedule(doctor_id)]).await?;
            if tx.schedule_size(doctor_id).await? >= MAX_WINDOWS_PER_DOCTOR {
                return Err(BookingError::LimitExceeded("too many schedule windows for doctor"));
            }

            let entry = ScheduleEntry {
                id: Ulid::new(),
                doctor_id,
                weekday,
                window,
            };
            let id = entry.id;
            tx.stage(Event::ScheduleEntryAdded { entry });
            tx.commit().await?;
            Ok(id)
        })
        .await
    }

    /// Remove a window. Appointments already booked inside it stay booked.
    pub async fn remove_schedule_entry(&self, entry_id: Ulid) -> Result<(), BookingError> {
        instrumented("remove_schedule_entry", async {
            let before = self
                .store
                .schedule_entry(entry_id)
                .await?
                .ok_or(BookingError::NotFound(entry_id))?;
            let mut tx = self.store.begin(vec![LockKey::Schedule(before.doctor_id)]).await?;
            if tx.schedule_entry(entry_id).await?.is_none() {
                return Err(BookingError::NotFound(entry_id));
            }

            tx.stage(Event::ScheduleEntryRemoved {
                id: entry_id,
                doctor_id: before.doctor_id,
            });
            tx.commit().await?;
            Ok(())
        })
        .await
    }
}
