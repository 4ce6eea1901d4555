mod common;

use std::sync::Arc;

use uuid::Uuid;

use scheduling_cell::models::OptimizationConfig;
use scheduling_cell::services::optimizer::ScheduleOptimizerService;
use shared_config::EngineConfig;
use shared_models::{SessionStatus, TimeWindow};
use shared_store::{InMemoryStore, RecordStore};

use common::*;

fn service() -> (ScheduleOptimizerService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    (
        ScheduleOptimizerService::new(store.clone(), EngineConfig::default()),
        store,
    )
}

#[tokio::test]
async fn optimizer_never_regresses_the_composite_score() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(17, 0), 8))
        .await
        .unwrap();

    let sessions = vec![
        session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0)),
        session(therapist_id, d(2025, 7, 7), t(15, 0), t(16, 0)),
    ];

    let config = OptimizationConfig::default();
    let result = service.optimize(sessions, &config).await.unwrap();

    assert!(result.score_after.composite >= result.score_before.composite);
    assert!(result.improvement_percentage >= 0.0);
}

#[tokio::test]
async fn optimizer_moves_sessions_into_preferred_windows() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(17, 0), 8))
        .await
        .unwrap();

    // One session far outside the preferred morning block.
    let sessions = vec![session(therapist_id, d(2025, 7, 7), t(15, 0), t(16, 0))];

    let config = OptimizationConfig {
        preferred_times: vec![TimeWindow::new(t(9, 0), t(12, 0))],
        ..OptimizationConfig::default()
    };
    let result = service.optimize(sessions, &config).await.unwrap();

    assert!(!result.relocations.is_empty());
    assert!(result.score_after.composite > result.score_before.composite);
    let moved = &result.sessions[0];
    assert!(moved.start_time >= t(9, 0) && moved.end_time <= t(12, 0));
    assert_eq!(result.score_after.preference_match, 100.0);
}

#[tokio::test]
async fn relocations_never_introduce_overlaps() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(12, 0), 4))
        .await
        .unwrap();

    let sessions = vec![
        session(therapist_id, d(2025, 7, 7), t(9, 0), t(10, 0)),
        session(therapist_id, d(2025, 7, 7), t(10, 0), t(11, 0)),
        session(therapist_id, d(2025, 7, 7), t(11, 0), t(12, 0)),
    ];

    let config = OptimizationConfig {
        preferred_times: vec![TimeWindow::new(t(9, 0), t(11, 0))],
        ..OptimizationConfig::default()
    };
    let result = service.optimize(sessions, &config).await.unwrap();

    for (i, a) in result.sessions.iter().enumerate() {
        for b in result.sessions.iter().skip(i + 1) {
            if a.date == b.date {
                let disjoint = a.end_time <= b.start_time || b.end_time <= a.start_time;
                assert!(disjoint, "optimizer created an overlap");
            }
        }
    }
}

#[tokio::test]
async fn completed_sessions_are_never_relocated() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(17, 0), 8))
        .await
        .unwrap();

    let mut locked = session(therapist_id, d(2025, 7, 7), t(15, 0), t(16, 0));
    locked.status = SessionStatus::Completed;
    let locked_id = locked.id;

    let config = OptimizationConfig {
        preferred_times: vec![TimeWindow::new(t(9, 0), t(12, 0))],
        ..OptimizationConfig::default()
    };
    let result = service.optimize(vec![locked], &config).await.unwrap();

    assert!(result.relocations.is_empty());
    let untouched = result.sessions.iter().find(|s| s.id == locked_id).unwrap();
    assert_eq!(untouched.start_time, t(15, 0));
}

#[tokio::test]
async fn iteration_cap_bounds_the_search() {
    let (service, store) = service();
    let therapist_id = Uuid::new_v4();
    store
        .upsert_window(recurring_window(therapist_id, 1, t(9, 0), t(17, 0), 8))
        .await
        .unwrap();

    let sessions = vec![
        session(therapist_id, d(2025, 7, 7), t(13, 0), t(14, 0)),
        session(therapist_id, d(2025, 7, 7), t(15, 0), t(16, 0)),
    ];

    let config = OptimizationConfig {
        preferred_times: vec![TimeWindow::new(t(9, 0), t(12, 0))],
        max_iterations: 1,
        ..OptimizationConfig::default()
    };
    let result = service.optimize(sessions, &config).await.unwrap();

    assert!(result.iterations <= 1);
    assert!(result.relocations.len() <= 1);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("iteration cap")));
}

#[tokio::test]
async fn empty_input_yields_a_trivial_result() {
    let (service, _) = service();
    let result = service
        .optimize(vec![], &OptimizationConfig::default())
        .await
        .unwrap();
    assert_eq!(result.iterations, 0);
    assert!(result.relocations.is_empty());
}
