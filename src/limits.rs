/// Appointments accepted by a single `create_appointments` call.
pub const MAX_BATCH_SIZE: usize = 100;

/// Recurring availability windows a single doctor may hold across the week.
pub const MAX_WINDOWS_PER_DOCTOR: usize = 128;

/// Payments recorded against one appointment.
pub const MAX_PAYMENTS_PER_APPOINTMENT: usize = 256;

/// Upper bound on a single amount or total cost, in currency units.
pub const MAX_MONEY_UNITS: i64 = 1_000_000_000;
