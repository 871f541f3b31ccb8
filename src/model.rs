use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::interval::TimeRange;
use crate::schedule::ScheduleEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Cancelled and NoShow appointments no longer need their slot.
    pub fn releases_slot(self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::NoShow)
    }

    /// Scheduled is the only non-final status.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        self == next || self == AppointmentStatus::Scheduled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub doctor_id: Ulid,
    pub patient_id: Ulid,
    pub clinic_id: Ulid,
    pub room_id: Option<Ulid>,
    pub date: NaiveDate,
    pub time: TimeRange,
    pub total_cost: Decimal,
    pub status: AppointmentStatus,
}

/// Caller-supplied appointment data for create and update. Times are raw so the
/// engine can reject `end <= start` with a typed error instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppointmentRequest {
    pub doctor_id: Ulid,
    pub patient_id: Ulid,
    pub clinic_id: Ulid,
    pub room_id: Option<Ulid>,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Insurance,
    Transfer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub appointment_id: Ulid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
}

/// Committed changes. Flat, no nesting; this is both the WAL payload and the
/// change-feed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentUpdated {
        appointment: Appointment,
    },
    AppointmentDeleted {
        id: Ulid,
        doctor_id: Ulid,
    },
    PaymentRecorded {
        payment: Payment,
    },
    PaymentUpdated {
        id: Ulid,
        appointment_id: Ulid,
        amount: Decimal,
    },
    PaymentDeleted {
        id: Ulid,
        appointment_id: Ulid,
    },
    ScheduleEntryAdded {
        entry: ScheduleEntry,
    },
    ScheduleEntryRemoved {
        id: Ulid,
        doctor_id: Ulid,
    },
}

impl Event {
    /// Change-feed channel: the doctor for appointment and schedule changes,
    /// the appointment for payment changes.
    pub fn topic(&self) -> Ulid {
        match self {
            Event::AppointmentBooked { appointment }
            | Event::AppointmentUpdated { appointment } => appointment.doctor_id,
            Event::AppointmentDeleted { doctor_id, .. } => *doctor_id,
            Event::PaymentRecorded { payment } => payment.appointment_id,
            Event::PaymentUpdated { appointment_id, .. }
            | Event::PaymentDeleted { appointment_id, .. } => *appointment_id,
            Event::ScheduleEntryAdded { entry } => entry.doctor_id,
            Event::ScheduleEntryRemoved { doctor_id, .. } => *doctor_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balance {
    pub total_cost: Decimal,
    pub total_paid: Decimal,
    pub outstanding: Decimal,
}
