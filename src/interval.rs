use chrono::{Duration, NaiveTime};
use serde::{Deserialize, Serialize};

/// True iff `[a_start, a_end)` and `[b_start, b_end)` share at least one instant.
/// Intervals that merely touch at an endpoint do not overlap.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && a_end > b_start
}

/// True iff the inner interval lies within the outer one. Inclusive at both ends,
/// so an interval always contains itself.
pub fn contains<T: PartialOrd>(outer_start: T, outer_end: T, inner_start: T, inner_end: T) -> bool {
    inner_start >= outer_start && inner_end <= outer_end
}

/// Half-open time-of-day range `[start, end)` within a single calendar day.
/// `NaiveTime` stops at 23:59:59.999999999, so no range ends at midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// `None` unless `end` is strictly after `start`.
    pub fn checked(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &TimeRange) -> bool {
        contains(self.start, self.end, other.start, other.end)
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// Merge ranges sorted by start into disjoint ranges. Touching ranges merge.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end
        {
            last.end = last.end.max(range.end);
            continue;
        }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`. Both must be sorted by start and `base` disjoint.
pub fn subtract_intervals(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(TimeRange::new(current_start, b.end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn secs(s: u32) -> NaiveTime {
        NaiveTime::from_num_seconds_from_midnight_opt(s, 0).unwrap()
    }

    #[test]
    fn range_basics() {
        let r = TimeRange::new(t(9, 0), t(10, 30));
        assert_eq!(r.duration(), Duration::minutes(90));
        assert_eq!(r.to_string(), "09:00-10:30");
    }

    #[test]
    fn checked_rejects_empty_and_inverted() {
        assert!(TimeRange::checked(t(9, 0), t(9, 0)).is_none());
        assert!(TimeRange::checked(t(10, 0), t(9, 0)).is_none());
        assert!(TimeRange::checked(t(9, 0), t(9, 1)).is_some());
    }

    #[test]
    fn touching_ranges_do_not_overlap() {
        let a = TimeRange::new(t(9, 0), t(10, 0));
        let b = TimeRange::new(t(10, 0), t(11, 0));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn partial_overlap() {
        let a = TimeRange::new(t(10, 0), t(10, 30));
        let b = TimeRange::new(t(10, 15), t(10, 45));
        assert!(a.overlaps(&b));
    }

    #[test]
    fn containment_is_inclusive() {
        let window = TimeRange::new(t(9, 0), t(12, 0));
        assert!(window.contains(&window));
        assert!(window.contains(&TimeRange::new(t(11, 0), t(12, 0))));
        assert!(!window.contains(&TimeRange::new(t(8, 0), t(9, 30))));
        assert!(!window.contains(&TimeRange::new(t(11, 30), t(12, 1))));
    }

    #[test]
    fn free_functions_on_plain_numbers() {
        assert!(overlaps(1, 5, 4, 8));
        assert!(!overlaps(1, 5, 5, 8));
        assert!(contains(0, 10, 0, 10));
        assert!(!contains(0, 10, 0, 11));
    }

    #[test]
    fn merge_joins_overlapping_and_touching() {
        let merged = merge_overlapping(&[
            TimeRange::new(t(8, 0), t(10, 0)),
            TimeRange::new(t(9, 0), t(11, 0)),
            TimeRange::new(t(11, 0), t(12, 0)),
            TimeRange::new(t(14, 0), t(15, 0)),
        ]);
        assert_eq!(
            merged,
            vec![TimeRange::new(t(8, 0), t(12, 0)), TimeRange::new(t(14, 0), t(15, 0))]
        );
    }

    #[test]
    fn subtract_splits_base() {
        let base = [TimeRange::new(t(9, 0), t(12, 0)), TimeRange::new(t(13, 0), t(17, 0))];
        let busy = [
            TimeRange::new(t(9, 0), t(9, 30)),
            TimeRange::new(t(10, 0), t(10, 30)),
            TimeRange::new(t(11, 45), t(13, 30)),
        ];
        assert_eq!(
            subtract_intervals(&base, &busy),
            vec![
                TimeRange::new(t(9, 30), t(10, 0)),
                TimeRange::new(t(10, 30), t(11, 45)),
                TimeRange::new(t(13, 30), t(17, 0)),
            ]
        );
    }

    #[test]
    fn subtract_everything_leaves_nothing() {
        let base = [TimeRange::new(t(9, 0), t(10, 0))];
        let busy = [TimeRange::new(t(8, 0), t(11, 0))];
        assert!(subtract_intervals(&base, &busy).is_empty());
        assert_eq!(subtract_intervals(&base, &[]), base.to_vec());
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(
            a in 0u32..86_000,
            la in 1u32..300,
            b in 0u32..86_000,
            lb in 1u32..300,
        ) {
            let x = TimeRange::new(secs(a), secs(a + la));
            let y = TimeRange::new(secs(b), secs(b + lb));
            prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
        }

        #[test]
        fn adjacent_never_overlap(s in 0u32..80_000, l1 in 1u32..3_000, l2 in 1u32..3_000) {
            let x = TimeRange::new(secs(s), secs(s + l1));
            let y = TimeRange::new(secs(s + l1), secs(s + l1 + l2));
            prop_assert!(!x.overlaps(&y));
        }

        #[test]
        fn containment_implies_overlap(
            s in 0u32..80_000,
            l in 2u32..3_000,
            off in 0u32..1_000,
            il in 1u32..1_000,
        ) {
            let outer = TimeRange::new(secs(s), secs(s + l));
            let inner_start = s + off.min(l - 1);
            let inner_end = (inner_start + il).min(s + l);
            let inner = TimeRange::new(secs(inner_start), secs(inner_end));
            prop_assert!(outer.contains(&inner));
            prop_assert!(outer.overlaps(&inner));
        }
    }
}
