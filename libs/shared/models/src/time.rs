use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Map a calendar date to the 0 = Sunday .. 6 = Saturday convention used by
/// availability windows and templates.
pub fn weekday_index(date: NaiveDate) -> i32 {
    match date.weekday() {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        let end = self.end;
        start
            .iter_days()
            .take_while(move |d| *d <= end)
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// Minute-resolution time-of-day span within a single day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Half-open overlap: [self.start, self.end) intersects [start, end).
    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start < end && start < self.end
    }

    pub fn contains(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.start && end <= self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Distance in minutes from a candidate start to this window, zero when
    /// the start falls inside it. Used for preferred-time tie-breaking.
    pub fn distance_minutes(&self, start: NaiveTime) -> i64 {
        if start < self.start {
            (self.start - start).num_minutes()
        } else if start >= self.end {
            (start - self.end).num_minutes() + 1
        } else {
            0
        }
    }
}
