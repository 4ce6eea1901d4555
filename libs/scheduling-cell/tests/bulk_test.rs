mod common;

use std::sync::Arc;

use uuid::Uuid;

use scheduling_cell::models::{BulkOperation, BulkOperationResult};
use scheduling_cell::services::bulk::BulkOperationsService;
use shared_config::EngineConfig;
use shared_models::{BilingualText, DateRange, SessionStatus};
use shared_store::{InMemoryStore, RecordStore};

use common::*;

fn service() -> (BulkOperationsService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (
        BulkOperationsService::new(store.clone(), EngineConfig::default()),
        store,
    )
}

fn cancel_op() -> BulkOperation {
    BulkOperation::Cancel {
        reason: BilingualText::new("Clinic closure", "إغلاق العيادة"),
    }
}

#[tokio::test]
async fn every_item_lands_in_exactly_one_partition() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    let mut ids = Vec::new();
    for day in 7..10 {
        let stored = store
            .upsert_session(session(therapist_id, d(2025, 7, day), t(9, 0), t(10, 0)), None)
            .await
            .unwrap();
        ids.push(stored.id);
    }
    // One id that does not exist, and one session already completed.
    ids.push(Uuid::new_v4());
    let mut completed = session(therapist_id, d(2025, 7, 10), t(9, 0), t(10, 0));
    completed.status = SessionStatus::Completed;
    let completed = store.upsert_session(completed, None).await.unwrap();
    ids.push(completed.id);

    let result = service.apply(&ids, &cancel_op(), None).await.unwrap();

    assert_eq!(result.total_processed(), ids.len());
    assert_eq!(result.successful_session_ids.len(), 3);
    assert_eq!(result.failed_session_ids.len(), 2);
    assert_eq!(result.failure_reasons.len(), 2);
    assert!(result.conflict_session_ids.is_empty());
}

#[tokio::test]
async fn batch_size_only_changes_chunking_not_outcome() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    let mut ids = Vec::new();
    for day in 7..12 {
        let stored = store
            .upsert_session(session(therapist_id, d(2025, 7, day), t(9, 0), t(10, 0)), None)
            .await
            .unwrap();
        ids.push(stored.id);
    }

    let result = service.apply(&ids, &cancel_op(), Some(2)).await.unwrap();
    assert_eq!(result.successful_session_ids.len(), 5);
    assert_eq!(result.total_processed(), 5);
}

#[tokio::test]
async fn cancel_releases_the_window_booking() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    let window = store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 1))
        .await
        .unwrap();
    store.adjust_booking(window.id, d(2025, 7, 7), 1).await.unwrap();

    let mut booked = session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0));
    booked.availability_window_id = Some(window.id);
    let booked = store.upsert_session(booked, None).await.unwrap();

    let result = service.apply(&[booked.id], &cancel_op(), None).await.unwrap();
    assert_eq!(result.successful_session_ids, vec![booked.id]);

    let stored = store.get_session(booked.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert!(stored.cancellation_reason.is_some());

    let stored_window = store.get_window(window.id).await.unwrap().unwrap();
    assert_eq!(stored_window.current_bookings, 0);
}

#[tokio::test]
async fn reschedule_preserves_lineage_and_counts() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 2))
        .await
        .unwrap();

    let original = store
        .upsert_session(session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0)), None)
        .await
        .unwrap();

    let op = BulkOperation::Reschedule {
        new_range: DateRange::new(d(2025, 7, 14), d(2025, 7, 18)),
        new_therapist_id: None,
    };
    let result = service.apply(&[original.id], &op, None).await.unwrap();

    assert_eq!(result.successful_session_ids, vec![original.id]);
    assert_eq!(result.created_session_ids.len(), 1);

    let old = store.get_session(original.id).await.unwrap().unwrap();
    assert_eq!(old.status, SessionStatus::Rescheduled);

    let replacement = store
        .get_session(result.created_session_ids[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(replacement.original_session_id, Some(original.id));
    assert_eq!(replacement.reschedule_count, 1);
    assert_eq!(replacement.status, SessionStatus::Scheduled);
    // Landed inside the new range, on the Monday window.
    assert!(replacement.date >= d(2025, 7, 14) && replacement.date <= d(2025, 7, 18));
}

#[tokio::test]
async fn reschedule_without_free_slots_is_reported_as_conflict() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    // No windows in the target week at all.
    let original = store
        .upsert_session(session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0)), None)
        .await
        .unwrap();

    let op = BulkOperation::Reschedule {
        new_range: DateRange::new(d(2025, 7, 14), d(2025, 7, 18)),
        new_therapist_id: None,
    };
    let result = service.apply(&[original.id], &op, None).await.unwrap();

    assert_eq!(result.conflict_session_ids, vec![original.id]);
    assert!(result.successful_session_ids.is_empty());

    // Untouched: still scheduled at its original time.
    let stored = store.get_session(original.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Scheduled);
    assert_eq!(stored.reschedule_count, 0);
}

#[tokio::test]
async fn modify_validates_and_recomputes_conflicts() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 2))
        .await
        .unwrap();

    let stored = store
        .upsert_session(session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0)), None)
        .await
        .unwrap();

    // Invalid duration fails the item, not the batch.
    let bad = BulkOperation::Modify {
        duration_minutes: Some(0),
        room_id: None,
        equipment_ids: None,
        priority: None,
        notes: None,
    };
    let result = service.apply(&[stored.id], &bad, None).await.unwrap();
    assert_eq!(result.failed_session_ids, vec![stored.id]);

    // Extending the duration inside the window succeeds.
    let extend = BulkOperation::Modify {
        duration_minutes: Some(90),
        room_id: None,
        equipment_ids: None,
        priority: Some(5),
        notes: Some("extended per assessment".to_string()),
    };
    let result = service.apply(&[stored.id], &extend, None).await.unwrap();
    assert_eq!(result.successful_session_ids, vec![stored.id]);

    let updated = store.get_session(stored.id).await.unwrap().unwrap();
    assert_eq!(updated.duration_minutes, 90);
    assert_eq!(updated.end_time, t(10, 30));
    assert_eq!(updated.priority, 5);
}

#[tokio::test]
async fn rollback_restores_prior_state_and_bookings() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    let window = store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 1))
        .await
        .unwrap();
    store.adjust_booking(window.id, d(2025, 7, 7), 1).await.unwrap();

    let mut booked = session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0));
    booked.availability_window_id = Some(window.id);
    let booked = store.upsert_session(booked, None).await.unwrap();

    let result = service.apply(&[booked.id], &cancel_op(), None).await.unwrap();
    assert!(result.rollback_available);

    let restored = service.rollback(&result).await.unwrap();
    assert_eq!(restored, 1);

    let stored = store.get_session(booked.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Scheduled);
    let stored_window = store.get_window(window.id).await.unwrap().unwrap();
    assert_eq!(stored_window.current_bookings, 1);
}

#[tokio::test]
async fn rollback_requires_a_retained_snapshot() {
    let (service, _) = service();
    let empty = BulkOperationResult {
        successful_session_ids: vec![],
        failed_session_ids: vec![],
        conflict_session_ids: vec![],
        failure_reasons: vec![],
        rollback_available: false,
        snapshots: vec![],
        created_session_ids: vec![],
    };
    assert!(service.rollback(&empty).await.is_err());
}
