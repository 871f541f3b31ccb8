use chrono::Weekday;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::store::StoreError;

/// Why a proposed write was refused. Serialized with a `reason` tag so callers
/// can render it without matching on Rust types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason")]
pub enum Rejection {
    DoctorOverlap {
        doctor_id: Ulid,
        conflicting_id: Ulid,
    },
    OutsideSchedule {
        doctor_id: Ulid,
        weekday: Weekday,
    },
    RoomOverlap {
        room_id: Ulid,
        conflicting_id: Ulid,
    },
    Overpayment {
        appointment_id: Ulid,
        total_paid: Decimal,
        total_cost: Decimal,
    },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::DoctorOverlap { .. } => "DoctorOverlap",
            Rejection::OutsideSchedule { .. } => "OutsideSchedule",
            Rejection::RoomOverlap { .. } => "RoomOverlap",
            Rejection::Overpayment { .. } => "Overpayment",
        }
    }

    /// The existing appointment this one collides with, if any.
    pub fn conflicting_id(&self) -> Option<Ulid> {
        match self {
            Rejection::DoctorOverlap { conflicting_id, .. }
            | Rejection::RoomOverlap { conflicting_id, .. } => Some(*conflicting_id),
            _ => None,
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::DoctorOverlap { doctor_id, conflicting_id } => {
                write!(f, "doctor {doctor_id} is already booked by appointment {conflicting_id}")
            }
            Rejection::OutsideSchedule { doctor_id, weekday } => {
                write!(f, "outside the schedule of doctor {doctor_id} on {weekday}")
            }
            Rejection::RoomOverlap { room_id, conflicting_id } => {
                write!(f, "room {room_id} is already booked by appointment {conflicting_id}")
            }
            Rejection::Overpayment { appointment_id, total_paid, total_cost } => write!(
                f,
                "payments for appointment {appointment_id} would total {total_paid}, \
                 above its cost of {total_cost}"
            ),
        }
    }
}

#[derive(Debug)]
pub enum BookingError {
    /// Expected, recoverable, shown to the end user.
    Rejected(Rejection),
    NotFound(Ulid),
    InvalidRequest(&'static str),
    LimitExceeded(&'static str),
    /// Lock wait timed out or the row moved under us. Safe to retry the whole operation.
    ConcurrencyConflict(String),
    StorageUnavailable(String),
    /// Stored data contradicts an invariant the engine maintains.
    InvariantViolation(String),
}

impl BookingError {
    /// Only concurrency conflicts are worth a blind retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::ConcurrencyConflict(_))
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            BookingError::Rejected(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Rejection> for BookingError {
    fn from(r: Rejection) -> Self {
        BookingError::Rejected(r)
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::LockTimeout(key) => {
                BookingError::ConcurrencyConflict(format!("lock wait timed out on {key:?}"))
            }
            StoreError::Serialization(msg) => BookingError::ConcurrencyConflict(msg),
            StoreError::Unavailable(msg) => BookingError::StorageUnavailable(msg),
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::Rejected(r) => write!(f, "rejected ({}): {r}", r.code()),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::ConcurrencyConflict(msg) => write!(f, "concurrency conflict: {msg}"),
            BookingError::StorageUnavailable(msg) => write!(f, "storage unavailable: {msg}"),
            BookingError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for BookingError {}
