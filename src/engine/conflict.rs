use ulid::Ulid;

use crate::config::BookingConfig;
use crate::interval::TimeRange;
use crate::model::{Appointment, AppointmentStatus};
use crate::schedule::weekday_of;
use crate::store::BookingView;

use super::{BookingError, Rejection};

/// Which existing appointments hold on to their slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictPolicy {
    /// When set, Cancelled and NoShow appointments keep blocking their
    /// doctor and room like any other row.
    pub cancelled_blocks_slot: bool,
}

impl ConflictPolicy {
    pub fn from_config(config: &BookingConfig) -> Self {
        Self {
            cancelled_blocks_slot: config.cancelled_blocks_slot,
        }
    }

    pub fn occupies(&self, status: AppointmentStatus) -> bool {
        self.cancelled_blocks_slot || !status.releases_slot()
    }
}

/// Validate `proposed` against committed state in three fixed steps:
///
/// A. no other appointment of the same doctor on that date overlaps it,
/// B. one of the doctor's windows for that weekday contains it,
/// C. no other appointment in the same room on that date overlaps it.
///
/// The first failing step decides the rejection. `exclude_id` is the
/// appointment's own id when revalidating an update. Existing appointments
/// are scanned by (start, id) so the reported conflict is deterministic.
pub async fn check_appointment<V: BookingView + ?Sized>(
    view: &V,
    proposed: &Appointment,
    exclude_id: Option<Ulid>,
    policy: &ConflictPolicy,
) -> Result<(), BookingError> {
    check_with_peers(view, proposed, exclude_id, &[], policy).await
}

/// Validate appointments proposed together. Each member runs the same three
/// steps in order, with the members before it counted as existing
/// appointments, so the earlier member of a colliding pair is the conflict.
pub async fn check_batch<V: BookingView + ?Sized>(
    view: &V,
    proposed: &[Appointment],
    policy: &ConflictPolicy,
) -> Result<(), BookingError> {
    for (i, appointment) in proposed.iter().enumerate() {
        check_with_peers(view, appointment, None, &proposed[..i], policy).await?;
    }
    Ok(())
}

/// The three steps against committed rows plus `peers`, which are not yet
/// in the store.
async fn check_with_peers<V: BookingView + ?Sized>(
    view: &V,
    proposed: &Appointment,
    exclude_id: Option<Ulid>,
    peers: &[Appointment],
    policy: &ConflictPolicy,
) -> Result<(), BookingError> {
    if !policy.occupies(proposed.status) {
        return Ok(());
    }

    let mut same_doctor = view
        .appointments_for_doctor(proposed.doctor_id, proposed.date, exclude_id)
        .await?;
    same_doctor.extend(
        peers
            .iter()
            .filter(|p| p.doctor_id == proposed.doctor_id && p.date == proposed.date)
            .cloned(),
    );
    if let Some(existing) = first_overlap(same_doctor, &proposed.time, policy) {
        return Err(Rejection::DoctorOverlap {
            doctor_id: proposed.doctor_id,
            conflicting_id: existing.id,
        }
        .into());
    }

    let weekday = weekday_of(proposed.date);
    let windows = view.availability_for(proposed.doctor_id, weekday).await?;
    if !windows.iter().any(|w| w.contains(&proposed.time)) {
        return Err(Rejection::OutsideSchedule {
            doctor_id: proposed.doctor_id,
            weekday,
        }
        .into());
    }

    if let Some(room_id) = proposed.room_id {
        let mut same_room = view
            .appointments_for_room(room_id, proposed.date, exclude_id)
            .await?;
        same_room.extend(
            peers
                .iter()
                .filter(|p| p.room_id == Some(room_id) && p.date == proposed.date)
                .cloned(),
        );
        if let Some(existing) = first_overlap(same_room, &proposed.time, policy) {
            return Err(Rejection::RoomOverlap {
                room_id,
                conflicting_id: existing.id,
            }
            .into());
        }
    }

    Ok(())
}

fn first_overlap(
    mut existing: Vec<Appointment>,
    time: &TimeRange,
    policy: &ConflictPolicy,
) -> Option<Appointment> {
    existing.retain(|a| policy.occupies(a.status));
    existing.sort_unstable_by_key(|a| (a.time.start, a.id));
    existing.into_iter().find(|a| a.time.overlaps(time))
}
