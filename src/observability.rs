use crate::engine::{BookingError, Rejection};

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine mutations. Labels: op, status.
pub const MUTATIONS_TOTAL: &str = "docket_mutations_total";

/// Histogram: mutation latency in seconds, lock wait included. Labels: op.
pub const MUTATION_DURATION_SECONDS: &str = "docket_mutation_duration_seconds";

/// Counter: validation rejections. Labels: reason.
pub const REJECTIONS_TOTAL: &str = "docket_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: lock waits that hit the configured timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "docket_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "docket_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "docket_wal_flush_batch_size";

/// Short status label for a finished mutation.
pub fn status_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(BookingError::Rejected(_)) => "rejected",
        Err(BookingError::NotFound(_)) => "not_found",
        Err(BookingError::InvalidRequest(_)) => "invalid",
        Err(BookingError::LimitExceeded(_)) => "limit",
        Err(BookingError::ConcurrencyConflict(_)) => "conflict",
        Err(BookingError::StorageUnavailable(_)) => "unavailable",
        Err(BookingError::InvariantViolation(_)) => "internal",
    }
}

pub fn rejection_label(rejection: &Rejection) -> &'static str {
    match rejection {
        Rejection::DoctorOverlap { .. } => "doctor_overlap",
        Rejection::OutsideSchedule { .. } => "outside_schedule",
        Rejection::RoomOverlap { .. } => "room_overlap",
        Rejection::Overpayment { .. } => "overpayment",
    }
}
