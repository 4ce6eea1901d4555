use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text::BilingualText;
use crate::time::weekday_index;

/// One recurring or date-specific block during which a therapist can be
/// booked. Exactly one of `day_of_week` / `specific_date` is set; a
/// date-specific window overrides recurring windows for that date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub day_of_week: Option<i32>, // 0 = Sunday, 1 = Monday, etc.
    pub specific_date: Option<NaiveDate>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_recurring: bool,
    pub max_sessions_per_slot: i32,
    pub current_bookings: i32,
    pub is_available: bool,
    pub is_time_off: bool,
    pub time_off_reason: Option<BilingualText>,
    pub notes: Option<String>,
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityWindow {
    /// Whether this window applies on the given calendar date, before the
    /// date-specific-override and exception layers are considered.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        match (self.specific_date, self.day_of_week) {
            (Some(specific), _) => specific == date,
            (None, Some(dow)) => self.is_recurring && dow == weekday_index(date),
            (None, None) => false,
        }
    }

    /// Whether `[start, end)` falls entirely inside this window.
    pub fn covers(&self, start: NaiveTime, end: NaiveTime) -> bool {
        start >= self.start_time && end <= self.end_time
    }

    pub fn remaining_capacity(&self) -> i32 {
        (self.max_sessions_per_slot - self.current_bookings).max(0)
    }

    /// A window accepts bookings only when available, not time off, and
    /// below capacity.
    pub fn is_bookable(&self) -> bool {
        self.is_available && !self.is_time_off && self.remaining_capacity() > 0
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// One weekly slot inside an availability template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_sessions_per_slot: i32,
}

/// A named, reusable weekly availability pattern. `therapist_id = None`
/// marks a template shared across therapists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityTemplate {
    pub id: Uuid,
    pub name: BilingualText,
    pub therapist_id: Option<Uuid>,
    pub slots: Vec<TemplateSlot>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Alternative time suggested alongside an exception (e.g. make-up slots
/// offered for a vacation period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedTime {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Date-range override masking a therapist's regular availability.
/// `is_available = false` removes all windows in the range;
/// `is_available = true` with a time span restricts windows to that span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub id: Uuid,
    pub therapist_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_available: bool,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<BilingualText>,
    pub alternative_times: Vec<SuggestedTime>,
    pub created_at: DateTime<Utc>,
}

impl AvailabilityException {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}
