use chrono::{Duration, NaiveDate, Weekday};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::interval::TimeRange;
use crate::model::*;
use crate::schedule::weekday_of;
use crate::store::{BookingView, Store};

use super::availability::free_slots;
use super::conflict::check_appointment;
use super::mutations::{new_appointment, validate_request};
use super::{BookingError, Engine};

impl<S: Store> Engine<S> {
    pub async fn appointment(&self, id: Ulid) -> Result<Appointment, BookingError> {
        self.store.appointment(id).await?.ok_or(BookingError::NotFound(id))
    }

    /// Appointments of one doctor on one date, by start time. Includes
    /// cancelled and no-show rows.
    pub async fn appointments_for_doctor(
        &self,
        doctor_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, BookingError> {
        let mut appointments = self.store.appointments_for_doctor(doctor_id, date, None).await?;
        appointments.sort_by_key(|a| (a.time.start, a.id));
        Ok(appointments)
    }

    pub async fn payments(&self, appointment_id: Ulid) -> Result<Vec<Payment>, BookingError> {
        self.appointment(appointment_id).await?;
        Ok(self.store.payments_for(appointment_id).await?)
    }

    pub async fn balance(&self, appointment_id: Ulid) -> Result<Balance, BookingError> {
        let appointment = self.appointment(appointment_id).await?;
        let total_paid = self
            .store
            .payments_for(appointment_id)
            .await?
            .iter()
            .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p.amount))
            .ok_or(BookingError::LimitExceeded("payment total out of range"))?;
        Ok(Balance {
            total_cost: appointment.total_cost,
            total_paid,
            outstanding: appointment.total_cost - total_paid,
        })
    }

    /// Every window the doctor holds on `weekday`, by start time.
    pub async fn availability(
        &self,
        doctor_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<TimeRange>, BookingError> {
        let mut windows = self.store.availability_for(doctor_id, weekday).await?;
        windows.sort_by_key(|w| (w.start, w.end));
        Ok(windows)
    }

    /// Run the conflict checker against committed state without writing.
    /// Pass the appointment's id as `exclude_id` to validate a reschedule.
    pub async fn check_appointment(
        &self,
        request: &AppointmentRequest,
        exclude_id: Option<Ulid>,
    ) -> Result<(), BookingError> {
        let time = validate_request(request)?;
        let proposed = new_appointment(exclude_id.unwrap_or_else(Ulid::new), request, time);
        check_appointment(&self.store, &proposed, exclude_id, &self.policy).await
    }

    /// Bookable gaps in the doctor's day of at least `min_duration`.
    pub async fn free_slots(
        &self,
        doctor_id: Ulid,
        date: NaiveDate,
        min_duration: Duration,
    ) -> Result<Vec<TimeRange>, BookingError> {
        let windows = self.store.availability_for(doctor_id, weekday_of(date)).await?;
        let busy: Vec<TimeRange> = self
            .store
            .appointments_for_doctor(doctor_id, date, None)
            .await?
            .into_iter()
            .filter(|a| self.policy.occupies(a.status))
            .map(|a| a.time)
            .collect();
        Ok(free_slots(&windows, &busy, min_duration))
    }
}
