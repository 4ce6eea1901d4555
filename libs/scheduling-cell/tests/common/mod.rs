#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use scheduling_cell::models::SchedulingRequest;
use shared_models::{
    AvailabilityWindow, ResolutionStatus, ScheduledSession, SessionCategory, SessionStatus,
};
use shared_store::{InMemoryStore, RecordStore};

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

pub fn session(
    therapist_id: Uuid,
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> ScheduledSession {
    ScheduledSession {
        id: Uuid::new_v4(),
        session_number: format!("THS-{}", Uuid::new_v4().simple()),
        demand_id: Uuid::new_v4(),
        therapist_id,
        student_id: None,
        room_id: None,
        equipment_ids: vec![],
        availability_window_id: None,
        date,
        start_time: start,
        end_time: end,
        duration_minutes: (end - start).num_minutes() as i32,
        category: SessionCategory::Therapy,
        priority: 3,
        status: SessionStatus::Scheduled,
        has_conflicts: false,
        conflict_details: vec![],
        resolution_status: ResolutionStatus::Pending,
        original_session_id: None,
        reschedule_count: 0,
        optimization_score: None,
        cancellation_reason: None,
        is_billable: true,
        timezone: "Asia/Riyadh".to_string(),
        notes: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Three-week demand with no stated preferences: Sunday 2025-07-06 through
/// Saturday 2025-07-26.
pub fn base_request(total_sessions: i32, sessions_per_week: i32) -> SchedulingRequest {
    SchedulingRequest {
        demand_id: Uuid::new_v4(),
        student_id: None,
        preferred_therapist_id: None,
        preferred_times: vec![],
        avoided_times: vec![],
        preferred_days: vec![],
        avoided_days: vec![],
        start_date: d(2025, 7, 6),
        end_date: d(2025, 7, 26),
        total_sessions,
        sessions_per_week,
        duration_minutes: 60,
        category: SessionCategory::Therapy,
        priority: 3,
        flexibility_score: 50,
        require_consecutive_days: false,
        max_gap_days: None,
        room_id: None,
        equipment_ids: vec![],
        is_billable: true,
        timezone: "Asia/Riyadh".to_string(),
    }
}

/// A therapist available Mon/Wed/Fri 09:00-12:00, one session per slot.
pub async fn seed_mwf_therapist(store: &Arc<InMemoryStore>) -> Uuid {
    let therapist_id = Uuid::new_v4();
    for day in [1, 3, 5] {
        store
            .upsert_window(recurring_window(therapist_id, day, t(9, 0), t(12, 0), 1))
            .await
            .unwrap();
    }
    therapist_id
}
