use chrono::{NaiveDate, Weekday};
use dashmap::DashMap;
use ulid::Ulid;

use crate::interval::TimeRange;
use crate::model::*;
use crate::schedule::{ScheduleEntry, WeeklySchedule};

type DayKey = (Ulid, NaiveDate);

/// Committed rows plus the secondary indexes the checkers query by.
/// No locking here beyond dashmap's own shards; `Shared` decides who may
/// read or apply when.
#[derive(Default)]
pub(super) struct Tables {
    appointments: DashMap<Ulid, Appointment>,
    by_doctor_day: DashMap<DayKey, Vec<Ulid>>,
    by_room_day: DashMap<DayKey, Vec<Ulid>>,
    payments: DashMap<Ulid, Payment>,
    /// appointment id → payment ids, in recording order
    ledger: DashMap<Ulid, Vec<Ulid>>,
    schedules: DashMap<Ulid, WeeklySchedule>,
    /// schedule entry id → doctor id
    schedule_owner: DashMap<Ulid, Ulid>,
}

impl Tables {
    // ── Appointments ─────────────────────────────────────────

    pub(super) fn appointment(&self, id: Ulid) -> Option<Appointment> {
        self.appointments.get(&id).map(|e| e.value().clone())
    }

    pub(super) fn appointment_count(&self) -> usize {
        self.appointments.len()
    }

    pub(super) fn for_doctor(
        &self,
        doctor_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Vec<Appointment> {
        self.collect_day(&self.by_doctor_day, (doctor_id, date), exclude)
    }

    pub(super) fn for_room(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        exclude: Option<Ulid>,
    ) -> Vec<Appointment> {
        self.collect_day(&self.by_room_day, (room_id, date), exclude)
    }

    fn collect_day(
        &self,
        index: &DashMap<DayKey, Vec<Ulid>>,
        key: DayKey,
        exclude: Option<Ulid>,
    ) -> Vec<Appointment> {
        let Some(ids) = index.get(&key) else {
            return Vec::new();
        };
        ids.iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| self.appointments.get(id).map(|e| e.value().clone()))
            .collect()
    }

    fn index(&self, a: &Appointment) {
        self.by_doctor_day.entry((a.doctor_id, a.date)).or_default().push(a.id);
        if let Some(room_id) = a.room_id {
            self.by_room_day.entry((room_id, a.date)).or_default().push(a.id);
        }
    }

    fn unindex(&self, a: &Appointment) {
        remove_from_day(&self.by_doctor_day, (a.doctor_id, a.date), a.id);
        if let Some(room_id) = a.room_id {
            remove_from_day(&self.by_room_day, (room_id, a.date), a.id);
        }
    }

    // ── Payments ─────────────────────────────────────────────

    pub(super) fn payment(&self, id: Ulid) -> Option<Payment> {
        self.payments.get(&id).map(|e| e.value().clone())
    }

    pub(super) fn payments_for(&self, appointment_id: Ulid) -> Vec<Payment> {
        self.ledger
            .get(&appointment_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.payments.get(id).map(|e| e.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn payment_count(&self) -> usize {
        self.payments.len()
    }

    // ── Schedules ────────────────────────────────────────────

    pub(super) fn windows(&self, doctor_id: Ulid, weekday: Weekday) -> Vec<TimeRange> {
        self.schedules
            .get(&doctor_id)
            .map(|s| s.windows_on(weekday).copied().collect())
            .unwrap_or_default()
    }

    pub(super) fn schedule_entry(&self, id: Ulid) -> Option<ScheduleEntry> {
        let doctor_id = *self.schedule_owner.get(&id)?;
        self.schedules
            .get(&doctor_id)?
            .entries()
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    pub(super) fn schedule_size(&self, doctor_id: Ulid) -> usize {
        self.schedules.get(&doctor_id).map_or(0, |s| s.len())
    }

    // ── Event application ────────────────────────────────────

    pub(super) fn apply(&self, event: &Event) {
        match event {
            Event::AppointmentBooked { appointment } => {
                self.index(appointment);
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::AppointmentUpdated { appointment } => {
                if let Some((_, old)) = self.appointments.remove(&appointment.id) {
                    self.unindex(&old);
                }
                self.index(appointment);
                self.appointments.insert(appointment.id, appointment.clone());
            }
            Event::AppointmentDeleted { id, .. } => {
                if let Some((_, old)) = self.appointments.remove(id) {
                    self.unindex(&old);
                }
                // Payments belong to the appointment aggregate.
                if let Some((_, payment_ids)) = self.ledger.remove(id) {
                    for pid in payment_ids {
                        self.payments.remove(&pid);
                    }
                }
            }
            Event::PaymentRecorded { payment } => {
                self.ledger.entry(payment.appointment_id).or_default().push(payment.id);
                self.payments.insert(payment.id, payment.clone());
            }
            Event::PaymentUpdated { id, amount, .. } => {
                if let Some(mut p) = self.payments.get_mut(id) {
                    p.amount = *amount;
                }
            }
            Event::PaymentDeleted { id, appointment_id } => {
                self.payments.remove(id);
                if let Some(mut ids) = self.ledger.get_mut(appointment_id) {
                    ids.retain(|p| p != id);
                }
            }
            Event::ScheduleEntryAdded { entry } => {
                self.schedules.entry(entry.doctor_id).or_default().insert(entry.clone());
                self.schedule_owner.insert(entry.id, entry.doctor_id);
            }
            Event::ScheduleEntryRemoved { id, doctor_id } => {
                self.schedule_owner.remove(id);
                if let Some(mut s) = self.schedules.get_mut(doctor_id) {
                    s.remove(*id);
                }
            }
        }
    }

    // ── Snapshot ─────────────────────────────────────────────

    /// Minimal records that rebuild the current state: windows, then
    /// appointments, then payments.
    pub(super) fn snapshot(&self) -> Vec<Vec<Event>> {
        let mut records = Vec::new();
        for schedule in self.schedules.iter() {
            for entry in schedule.entries() {
                records.push(vec![Event::ScheduleEntryAdded { entry: entry.clone() }]);
            }
        }
        for a in self.appointments.iter() {
            records.push(vec![Event::AppointmentBooked { appointment: a.value().clone() }]);
        }
        for ids in self.ledger.iter() {
            for pid in ids.value() {
                if let Some(p) = self.payments.get(pid) {
                    records.push(vec![Event::PaymentRecorded { payment: p.value().clone() }]);
                }
            }
        }
        records
    }
}

fn remove_from_day(index: &DashMap<DayKey, Vec<Ulid>>, key: DayKey, id: Ulid) {
    if let Some(mut ids) = index.get_mut(&key) {
        ids.retain(|x| *x != id);
    }
    index.remove_if(&key, |_, ids| ids.is_empty());
}
