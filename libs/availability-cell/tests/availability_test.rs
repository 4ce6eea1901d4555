mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use uuid::Uuid;

use availability_cell::services::availability::AvailabilityService;
use shared_models::{DateRange, EngineError};
use shared_store::{InMemoryStore, RecordStore};

use common::*;

fn service() -> (AvailabilityService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (AvailabilityService::new(store.clone()), store)
}

#[tokio::test]
async fn upsert_rejects_inverted_time_range() {
    let (service, _) = service();
    let therapist_id = Uuid::new_v4();
    let window = recurring_window(therapist_id, 1, t(12, 0), t(9, 0), 1);

    let result = service.upsert_window(window).await;
    assert_matches!(result, Err(EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn upsert_rejects_zero_capacity() {
    let (service, _) = service();
    let window = recurring_window(Uuid::new_v4(), 1, t(9, 0), t(12, 0), 0);

    let result = service.upsert_window(window).await;
    assert_matches!(result, Err(EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn upsert_rejects_window_with_both_day_and_date() {
    let (service, _) = service();
    let therapist_id = Uuid::new_v4();
    let mut window = recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 1);
    window.specific_date = Some(d(2025, 7, 7));

    let result = service.upsert_window(window).await;
    assert_matches!(result, Err(EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn capacity_cannot_shrink_below_existing_bookings() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    let monday = d(2025, 7, 7);
    let window = recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 2);
    let window = service.upsert_window(window).await.unwrap();

    service.record_booking(window.id, monday).await.unwrap();
    service.record_booking(window.id, monday).await.unwrap();

    let mut shrunk = store.get_window(window.id).await.unwrap().unwrap();
    shrunk.max_sessions_per_slot = 1;
    let result = service.upsert_window(shrunk).await;
    assert_matches!(result, Err(EngineError::CapacityViolation(_)));
}

#[tokio::test]
async fn update_preserves_stored_booking_count() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    let window = service
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 3))
        .await
        .unwrap();
    service.record_booking(window.id, d(2025, 7, 7)).await.unwrap();

    // A caller sending a stale zero booking count must not reset the stored
    // value.
    let mut edited = window.clone();
    edited.current_bookings = 0;
    edited.notes = Some("extended".to_string());
    service.upsert_window(edited).await.unwrap();

    let stored = store.get_window(window.id).await.unwrap().unwrap();
    assert_eq!(stored.current_bookings, 1);
}

#[tokio::test]
async fn delete_is_rejected_while_bookings_remain() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    let window = service
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 1))
        .await
        .unwrap();
    service.record_booking(window.id, d(2025, 7, 7)).await.unwrap();

    let result = service.delete_window(window.id, false).await;
    assert_matches!(result, Err(EngineError::CapacityViolation(_)));

    // Explicit force-removal goes through.
    service.delete_window(window.id, true).await.unwrap();
    assert!(store.get_window(window.id).await.unwrap().is_none());
}

#[tokio::test]
async fn booking_count_never_exceeds_capacity() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    let monday = d(2025, 7, 7);
    let window = service
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 1))
        .await
        .unwrap();

    service.record_booking(window.id, monday).await.unwrap();
    let result = service.record_booking(window.id, monday).await;
    assert_matches!(result, Err(EngineError::CapacityViolation(_)));

    let stored = store.get_window(window.id).await.unwrap().unwrap();
    assert_eq!(stored.current_bookings, 1);
    assert!(stored.current_bookings <= stored.max_sessions_per_slot);

    // The following Monday is a fresh occurrence of the same window.
    let next_monday = d(2025, 7, 14);
    service.record_booking(window.id, next_monday).await.unwrap();

    service.release_booking(window.id, monday).await.unwrap();
    service.release_booking(window.id, next_monday).await.unwrap();
    let stored = store.get_window(window.id).await.unwrap().unwrap();
    assert_eq!(stored.current_bookings, 0);
}

#[tokio::test]
async fn query_merges_recurring_override_and_exception_layers() {
    let (service, _) = service();
    let therapist_id = Uuid::new_v4();

    // Recurring Mondays 09:00-12:00.
    service
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 1))
        .await
        .unwrap();
    // 2025-07-14 (a Monday) is overridden to the afternoon.
    let override_monday = d(2025, 7, 14);
    service
        .upsert_window(specific_window(therapist_id, override_monday, t(14, 0), t(17, 0)))
        .await
        .unwrap();
    // 2025-07-21 (the following Monday) is a day off.
    let vacation_monday = d(2025, 7, 21);
    service
        .upsert_exception(day_off(therapist_id, vacation_monday))
        .await
        .unwrap();

    let resolved = service
        .query(therapist_id, DateRange::new(d(2025, 7, 7), d(2025, 7, 21)))
        .await
        .unwrap();

    let day = |date| resolved.iter().find(|r| r.date == date).unwrap();

    // Plain Monday: recurring base.
    assert_eq!(day(d(2025, 7, 7)).windows.len(), 1);
    assert_eq!(day(d(2025, 7, 7)).windows[0].start_time, t(9, 0));
    // Overridden Monday: only the date-specific window.
    assert_eq!(day(override_monday).windows.len(), 1);
    assert_eq!(day(override_monday).windows[0].start_time, t(14, 0));
    // Vacation Monday: fully masked.
    assert!(day(vacation_monday).windows.is_empty());
    // A Tuesday has no windows at all.
    assert!(day(d(2025, 7, 8)).windows.is_empty());
}

#[tokio::test]
async fn query_is_deterministic_and_side_effect_free() {
    let (service, _) = service();
    let therapist_id = Uuid::new_v4();
    service
        .upsert_window(recurring_window(therapist_id, 3, t(9, 0), t(12, 0), 1))
        .await
        .unwrap();
    service
        .upsert_exception(partial_time_off(therapist_id, d(2025, 7, 9), t(10, 0), t(11, 0)))
        .await
        .unwrap();

    let range = DateRange::new(d(2025, 7, 7), d(2025, 7, 13));
    let first = service.query(therapist_id, range).await.unwrap();
    let second = service.query(therapist_id, range).await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.date, b.date);
        let times_a: Vec<_> = a.windows.iter().map(|w| (w.start_time, w.end_time)).collect();
        let times_b: Vec<_> = b.windows.iter().map(|w| (w.start_time, w.end_time)).collect();
        assert_eq!(times_a, times_b);
    }

    // The partial time off split Wednesday into two segments.
    let wednesday = first.iter().find(|r| r.date == d(2025, 7, 9)).unwrap();
    assert_eq!(wednesday.windows.len(), 2);
}
