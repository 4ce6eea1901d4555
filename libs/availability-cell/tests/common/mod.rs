#![allow(dead_code)]

use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use shared_models::{AvailabilityException, AvailabilityWindow, BilingualText};

pub fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn recurring_window(
    therapist_id: Uuid,
    day_of_week: i32,
    start: NaiveTime,
    end: NaiveTime,
    capacity: i32,
) -> AvailabilityWindow {
    AvailabilityWindow {
        id: Uuid::new_v4(),
        therapist_id,
        day_of_week: Some(day_of_week),
        specific_date: None,
        start_time: start,
        end_time: end,
        is_recurring: true,
        max_sessions_per_slot: capacity,
        current_bookings: 0,
        is_available: true,
        is_time_off: false,
        time_off_reason: None,
        notes: None,
        timezone: "Asia/Riyadh".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn specific_window(
    therapist_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> AvailabilityWindow {
    let mut window = recurring_window(therapist_id, 0, start, end, 1);
    window.day_of_week = None;
    window.specific_date = Some(date);
    window.is_recurring = false;
    window
}

pub fn day_off(therapist_id: Uuid, date: NaiveDate) -> AvailabilityException {
    AvailabilityException {
        id: Uuid::new_v4(),
        therapist_id,
        start_date: date,
        end_date: date,
        is_available: false,
        start_time: None,
        end_time: None,
        reason: Some(BilingualText::new("Vacation", "إجازة")),
        alternative_times: vec![],
        created_at: Utc::now(),
    }
}

pub fn partial_time_off(
    therapist_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> AvailabilityException {
    AvailabilityException {
        id: Uuid::new_v4(),
        therapist_id,
        start_date: date,
        end_date: date,
        is_available: false,
        start_time: Some(start),
        end_time: Some(end),
        reason: Some(BilingualText::new("Clinic meeting", "اجتماع العيادة")),
        alternative_times: vec![],
        created_at: Utc::now(),
    }
}
