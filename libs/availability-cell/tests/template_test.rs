mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use uuid::Uuid;

use availability_cell::models::{CreateTemplateRequest, UpdateTemplateRequest};
use availability_cell::services::template::TemplateService;
use shared_config::EngineConfig;
use shared_models::{BilingualText, EngineError, TemplateSlot};
use shared_store::{InMemoryStore, RecordStore};

use common::*;

fn service() -> (TemplateService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (
        TemplateService::new(store.clone(), EngineConfig::default()),
        store,
    )
}

fn slot(day_of_week: i32, start_h: u32, end_h: u32) -> TemplateSlot {
    TemplateSlot {
        day_of_week,
        start_time: t(start_h, 0),
        end_time: t(end_h, 0),
        max_sessions_per_slot: 1,
    }
}

fn morning_template() -> CreateTemplateRequest {
    CreateTemplateRequest {
        name: BilingualText::new("Weekday mornings", "صباحات أيام الأسبوع"),
        therapist_id: None,
        slots: vec![slot(1, 8, 12), slot(2, 8, 12)],
    }
}

#[tokio::test]
async fn create_rejects_empty_and_invalid_slots() {
    let (service, _) = service();

    let mut request = morning_template();
    request.slots = vec![];
    assert_matches!(
        service.create_template(request).await,
        Err(EngineError::InvalidInput(_))
    );

    let mut request = morning_template();
    request.slots = vec![slot(1, 12, 8)];
    assert_matches!(
        service.create_template(request).await,
        Err(EngineError::InvalidInput(_))
    );

    let mut request = morning_template();
    request.slots = vec![slot(9, 8, 12)];
    assert_matches!(
        service.create_template(request).await,
        Err(EngineError::InvalidInput(_))
    );
}

#[tokio::test]
async fn apply_expands_pattern_over_default_horizon() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    let template = service.create_template(morning_template()).await.unwrap();
    // 2025-07-07 is a Monday.
    let application = service
        .apply(template.id, therapist_id, d(2025, 7, 7))
        .await
        .unwrap();

    assert_eq!(application.created_windows.len(), 2);
    assert!(application.conflicts.is_empty());
    // Default horizon is 12 weeks.
    assert_eq!(
        (application.horizon_end - application.start_date).num_days(),
        12 * 7 - 1
    );

    let stored = store.windows_for_therapist(therapist_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|w| w.is_recurring));
}

#[tokio::test]
async fn apply_reports_collisions_without_aborting_the_batch() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    // Existing time-off exception on one Monday, 09:00-10:00.
    let off_monday = d(2025, 7, 14);
    store
        .upsert_exception(partial_time_off(therapist_id, off_monday, t(9, 0), t(10, 0)))
        .await
        .unwrap();

    let template = service.create_template(morning_template()).await.unwrap();
    let application = service
        .apply(template.id, therapist_id, d(2025, 7, 7))
        .await
        .unwrap();

    // Both windows are still created; the Monday collision is reported.
    assert_eq!(application.created_windows.len(), 2);
    assert_eq!(application.conflicts.len(), 1);
    let collision = &application.conflicts[0];
    assert_eq!(collision.date, off_monday);
    assert_eq!(collision.day_of_week, 1);
    assert!(collision.exception_id.is_some());
}

#[tokio::test]
async fn apply_flags_overlap_with_date_specific_window() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();

    let busy_tuesday = d(2025, 7, 15);
    let existing = specific_window(therapist_id, busy_tuesday, t(9, 0), t(11, 0));
    let existing_id = existing.id;
    store.upsert_window(existing).await.unwrap();

    let template = service.create_template(morning_template()).await.unwrap();
    let application = service
        .apply(template.id, therapist_id, d(2025, 7, 7))
        .await
        .unwrap();

    assert_eq!(application.conflicts.len(), 1);
    assert_eq!(
        application.conflicts[0].existing_window_id,
        Some(existing_id)
    );
    assert_eq!(application.conflicts[0].date, busy_tuesday);
}

#[tokio::test]
async fn inactive_template_cannot_be_applied() {
    let (service, _) = service();
    let therapist_id = Uuid::new_v4();

    let template = service.create_template(morning_template()).await.unwrap();
    service
        .update_template(
            template.id,
            UpdateTemplateRequest {
                name: None,
                slots: None,
                is_active: Some(false),
            },
        )
        .await
        .unwrap();

    let result = service.apply(template.id, therapist_id, d(2025, 7, 7)).await;
    assert_matches!(result, Err(EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn missing_template_is_a_hard_failure() {
    let (service, _) = service();
    let result = service
        .apply(Uuid::new_v4(), Uuid::new_v4(), d(2025, 7, 7))
        .await;
    assert_matches!(result, Err(EngineError::ResourceNotFound { .. }));
}
