use chrono::Duration;

use crate::interval::{merge_overlapping, subtract_intervals, TimeRange};

/// Free time in a doctor's day: the windows merged, minus busy ranges, keeping
/// only gaps of at least `min_duration`. Inputs may be unsorted and overlap.
pub fn free_slots(
    windows: &[TimeRange],
    busy: &[TimeRange],
    min_duration: Duration,
) -> Vec<TimeRange> {
    let mut windows = windows.to_vec();
    windows.sort_by_key(|w| w.start);
    let open = merge_overlapping(&windows);

    let mut busy = busy.to_vec();
    busy.sort_by_key(|b| b.start);
    let busy = merge_overlapping(&busy);

    subtract_intervals(&open, &busy)
        .into_iter()
        .filter(|gap| gap.duration() >= min_duration)
        .collect()
}
