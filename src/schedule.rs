use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::interval::TimeRange;

/// A recurring weekly availability window for one doctor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub doctor_id: Ulid,
    pub weekday: Weekday,
    pub window: TimeRange,
}

pub fn weekday_of(date: NaiveDate) -> Weekday {
    date.weekday()
}

fn day_index(weekday: Weekday) -> u32 {
    weekday.num_days_from_monday()
}

/// One doctor's weekly windows, sorted by `(weekday, window.start)`.
/// Windows on the same day may overlap; nothing here merges them.
#[derive(Debug, Clone, Default)]
pub struct WeeklySchedule {
    entries: Vec<ScheduleEntry>,
}

impl WeeklySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: ScheduleEntry) {
        let key = (day_index(entry.weekday), entry.window.start);
        let pos = self
            .entries
            .partition_point(|e| (day_index(e.weekday), e.window.start) <= key);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<ScheduleEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Every window on `weekday`, in start order.
    pub fn windows_on(&self, weekday: Weekday) -> impl Iterator<Item = &TimeRange> {
        let day = day_index(weekday);
        let lo = self.entries.partition_point(|e| day_index(e.weekday) < day);
        let hi = self.entries.partition_point(|e| day_index(e.weekday) <= day);
        self.entries[lo..hi].iter().map(|e| &e.window)
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
