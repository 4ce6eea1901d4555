use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::services::availability::AvailabilityService;
use shared_config::EngineConfig;
use shared_models::{DateRange, EngineError, ScheduledSession, SessionStatus};
use shared_store::RecordStore;

use crate::models::{BulkOperation, BulkOperationResult, CandidateSlot};
use crate::services::conflict::ConflictDetectionService;

/// Applies reschedule/cancel/modify operations across many sessions,
/// atomically per item. One item failing never aborts the batch; the result
/// partitions every input id into successful, failed, or conflicted.
pub struct BulkOperationsService {
    store: Arc<dyn RecordStore>,
    conflict_service: ConflictDetectionService,
    availability: AvailabilityService,
    config: EngineConfig,
}

enum ItemOutcome {
    Success,
    Conflict,
    Failure(String),
    /// Reschedule succeeded and produced a replacement session.
    Replaced(Uuid),
}

impl BulkOperationsService {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        let conflict_service = ConflictDetectionService::new(Arc::clone(&store), config.clone());
        let availability = AvailabilityService::new(Arc::clone(&store));
        Self {
            store,
            conflict_service,
            availability,
            config,
        }
    }

    #[instrument(skip(self, session_ids, operation), fields(items = session_ids.len()))]
    pub async fn apply(
        &self,
        session_ids: &[Uuid],
        operation: &BulkOperation,
        batch_size: Option<usize>,
    ) -> Result<BulkOperationResult, EngineError> {
        let mut result = BulkOperationResult {
            successful_session_ids: vec![],
            failed_session_ids: vec![],
            conflict_session_ids: vec![],
            failure_reasons: vec![],
            rollback_available: false,
            snapshots: vec![],
            created_session_ids: vec![],
        };

        let chunk_size = batch_size.unwrap_or(session_ids.len()).max(1);
        for chunk in session_ids.chunks(chunk_size) {
            for session_id in chunk {
                let session = match self.store.get_session(*session_id).await? {
                    Some(session) => session,
                    None => {
                        result.failed_session_ids.push(*session_id);
                        result
                            .failure_reasons
                            .push((*session_id, "session not found".to_string()));
                        continue;
                    }
                };

                let snapshot = session.clone();
                let outcome = match operation {
                    BulkOperation::Cancel { reason } => {
                        self.cancel_item(session, reason.clone()).await
                    }
                    BulkOperation::Modify {
                        duration_minutes,
                        room_id,
                        equipment_ids,
                        priority,
                        notes,
                    } => {
                        self.modify_item(
                            session,
                            *duration_minutes,
                            *room_id,
                            equipment_ids.clone(),
                            *priority,
                            notes.clone(),
                        )
                        .await
                    }
                    BulkOperation::Reschedule {
                        new_range,
                        new_therapist_id,
                    } => {
                        self.reschedule_item(session, *new_range, *new_therapist_id)
                            .await
                    }
                };

                match outcome {
                    Ok(ItemOutcome::Success) => {
                        result.snapshots.push(snapshot);
                        result.successful_session_ids.push(*session_id);
                    }
                    Ok(ItemOutcome::Replaced(new_id)) => {
                        result.snapshots.push(snapshot);
                        result.successful_session_ids.push(*session_id);
                        result.created_session_ids.push(new_id);
                    }
                    Ok(ItemOutcome::Conflict) => {
                        result.conflict_session_ids.push(*session_id);
                    }
                    Ok(ItemOutcome::Failure(reason)) => {
                        result.failed_session_ids.push(*session_id);
                        result.failure_reasons.push((*session_id, reason));
                    }
                    Err(e) => {
                        // Store-level failure on one item stays on that item.
                        result.failed_session_ids.push(*session_id);
                        result.failure_reasons.push((*session_id, e.to_string()));
                    }
                }
            }
        }

        result.rollback_available = !result.snapshots.is_empty();
        info!(
            successful = result.successful_session_ids.len(),
            failed = result.failed_session_ids.len(),
            conflicted = result.conflict_session_ids.len(),
            "Bulk operation complete"
        );
        Ok(result)
    }

    /// Best-effort restore of the prior state captured in a bulk result.
    /// Itself per-item: a failed restore is logged and skipped.
    pub async fn rollback(&self, result: &BulkOperationResult) -> Result<usize, EngineError> {
        if !result.rollback_available {
            return Err(EngineError::InvalidInput(
                "no rollback snapshot was retained for this result".to_string(),
            ));
        }

        let mut restored = 0;
        for created_id in &result.created_session_ids {
            if let Ok(Some(created)) = self.store.get_session(*created_id).await {
                if let Some(window_id) = created.availability_window_id {
                    let _ = self
                        .availability
                        .release_booking(window_id, created.date)
                        .await;
                }
                if self.store.delete_session(*created_id).await.is_err() {
                    warn!("Rollback could not delete created session {}", created_id);
                }
            }
        }
        for snapshot in &result.snapshots {
            // Cancelled/rescheduled items released their booking on the way
            // out; restoring the session restores the booking too.
            let booking_was_released = match self.store.get_session(snapshot.id).await {
                Ok(Some(current)) => snapshot.blocks_resources() && !current.blocks_resources(),
                _ => false,
            };
            match self.store.upsert_session(snapshot.clone(), None).await {
                Ok(_) => {
                    if booking_was_released {
                        if let Some(window_id) = snapshot.availability_window_id {
                            let _ = self
                                .availability
                                .record_booking(window_id, snapshot.date)
                                .await;
                        }
                    }
                    restored += 1;
                }
                Err(e) => warn!("Rollback failed for session {}: {}", snapshot.id, e),
            }
        }
        Ok(restored)
    }

    async fn cancel_item(
        &self,
        mut session: ScheduledSession,
        reason: shared_models::BilingualText,
    ) -> Result<ItemOutcome, EngineError> {
        if !session.status.can_transition_to(SessionStatus::Cancelled) {
            return Ok(ItemOutcome::Failure(format!(
                "session in status {} cannot be cancelled",
                session.status
            )));
        }

        let expected = session.updated_at;
        session.status = SessionStatus::Cancelled;
        session.cancellation_reason = Some(reason);

        match self.store.upsert_session(session.clone(), Some(expected)).await {
            Ok(_) => {
                if let Some(window_id) = session.availability_window_id {
                    let _ = self.availability.release_booking(window_id, session.date).await;
                }
                debug!("Session {} cancelled", session.id);
                Ok(ItemOutcome::Success)
            }
            Err(EngineError::ConcurrencyConflict(_)) => Ok(ItemOutcome::Failure(
                "session was modified concurrently".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    async fn modify_item(
        &self,
        mut session: ScheduledSession,
        duration_minutes: Option<i32>,
        room_id: Option<Uuid>,
        equipment_ids: Option<Vec<Uuid>>,
        priority: Option<i32>,
        notes: Option<String>,
    ) -> Result<ItemOutcome, EngineError> {
        if session.is_planning_locked() {
            return Ok(ItemOutcome::Failure(format!(
                "session in status {} is read-only",
                session.status
            )));
        }

        let expected = session.updated_at;
        let mut resources_changed = false;

        if let Some(duration) = duration_minutes {
            if duration <= 0 {
                return Ok(ItemOutcome::Failure("duration must be positive".to_string()));
            }
            session.duration_minutes = duration;
            session.end_time = session.start_time + Duration::minutes(duration as i64);
            resources_changed = true;
        }
        if let Some(new_room) = room_id {
            session.room_id = Some(new_room);
            resources_changed = true;
        }
        if let Some(new_equipment) = equipment_ids {
            session.equipment_ids = new_equipment;
            resources_changed = true;
        }
        if let Some(new_priority) = priority {
            if !(1..=5).contains(&new_priority) {
                return Ok(ItemOutcome::Failure(
                    "priority must be between 1 and 5".to_string(),
                ));
            }
            session.priority = new_priority;
        }
        if let Some(new_notes) = notes {
            session.notes = Some(new_notes);
        }

        // Conflict fields are recomputed whenever time/resource assignment
        // changes.
        if resources_changed {
            let candidate = CandidateSlot {
                therapist_id: session.therapist_id,
                date: session.date,
                start_time: session.start_time,
                end_time: session.end_time,
                room_id: session.room_id,
                equipment_ids: session.equipment_ids.clone(),
                student_id: session.student_id,
                exclude_session_id: Some(session.id),
                buffer_preference_minutes: None,
            };
            let conflicts = self.conflict_service.check(&candidate).await?;
            if conflicts.iter().any(|c| c.is_blocking()) {
                return Ok(ItemOutcome::Conflict);
            }
            session.has_conflicts = !conflicts.is_empty();
            session.conflict_details = conflicts;
        }

        match self.store.upsert_session(session, Some(expected)).await {
            Ok(_) => Ok(ItemOutcome::Success),
            Err(EngineError::ConcurrencyConflict(_)) => Ok(ItemOutcome::Failure(
                "session was modified concurrently".to_string(),
            )),
            Err(e) => Err(e),
        }
    }

    async fn reschedule_item(
        &self,
        mut session: ScheduledSession,
        new_range: DateRange,
        new_therapist_id: Option<Uuid>,
    ) -> Result<ItemOutcome, EngineError> {
        if session.is_planning_locked() {
            return Ok(ItemOutcome::Failure(format!(
                "session in status {} is read-only",
                session.status
            )));
        }
        if !session.status.can_transition_to(SessionStatus::Rescheduled) {
            return Ok(ItemOutcome::Failure(format!(
                "session in status {} cannot be rescheduled",
                session.status
            )));
        }

        let therapist_id = new_therapist_id.unwrap_or(session.therapist_id);
        let slot = self
            .find_free_slot(&session, therapist_id, new_range)
            .await?;

        let (date, start, end, window_id) = match slot {
            Some(slot) => slot,
            None => {
                debug!(
                    "No conflict-free slot found in {}..{} for session {}",
                    new_range.start, new_range.end, session.id
                );
                return Ok(ItemOutcome::Conflict);
            }
        };

        let expected = session.updated_at;
        let mut replacement = session.clone();
        replacement.id = Uuid::new_v4();
        replacement.therapist_id = therapist_id;
        replacement.date = date;
        replacement.start_time = start;
        replacement.end_time = end;
        replacement.availability_window_id = window_id;
        replacement.status = SessionStatus::Scheduled;
        replacement.original_session_id = Some(session.id);
        replacement.reschedule_count = session.reschedule_count + 1;
        replacement.has_conflicts = false;
        replacement.conflict_details = vec![];
        replacement.created_at = Utc::now();

        session.status = SessionStatus::Rescheduled;
        match self.store.upsert_session(session.clone(), Some(expected)).await {
            Ok(_) => {}
            Err(EngineError::ConcurrencyConflict(_)) => {
                return Ok(ItemOutcome::Failure(
                    "session was modified concurrently".to_string(),
                ));
            }
            Err(e) => return Err(e),
        }

        if let Some(old_window) = session.availability_window_id {
            let _ = self
                .availability
                .release_booking(old_window, session.date)
                .await;
        }
        if let Some(new_window) = window_id {
            let _ = self.availability.record_booking(new_window, date).await;
        }

        let replacement = self.store.upsert_session(replacement, None).await?;
        debug!(
            "Session {} rescheduled to {} as {}",
            session.id, date, replacement.id
        );
        Ok(ItemOutcome::Replaced(replacement.id))
    }

    /// First conflict-free slot in the range, preferring the session's
    /// original start time on each date before scanning the whole window.
    async fn find_free_slot(
        &self,
        session: &ScheduledSession,
        therapist_id: Uuid,
        range: DateRange,
    ) -> Result<
        Option<(chrono::NaiveDate, chrono::NaiveTime, chrono::NaiveTime, Option<Uuid>)>,
        EngineError,
    > {
        let duration = session.duration_minutes as i64;

        for date in range.days() {
            let resolved = self.availability.resolve_date(therapist_id, date).await?;
            let mut starts: Vec<chrono::NaiveTime> = vec![session.start_time];
            for window in resolved.iter().filter(|w| w.is_bookable()) {
                let mut start = window.start_time;
                while (window.end_time - start).num_minutes() >= duration {
                    starts.push(start);
                    start += Duration::minutes(self.config.slot_increment_minutes);
                }
            }
            starts.dedup();

            for start in starts {
                let end = start + Duration::minutes(duration);
                let window = resolved
                    .iter()
                    .find(|w| w.covers(start, end) && w.is_bookable());
                if window.is_none() {
                    continue;
                }
                let candidate = CandidateSlot {
                    therapist_id,
                    date,
                    start_time: start,
                    end_time: end,
                    room_id: session.room_id,
                    equipment_ids: session.equipment_ids.clone(),
                    student_id: session.student_id,
                    exclude_session_id: Some(session.id),
                    buffer_preference_minutes: None,
                };
                let conflicts = self.conflict_service.check(&candidate).await?;
                if conflicts.is_empty() {
                    return Ok(Some((date, start, end, window.map(|w| w.id))));
                }
            }
        }
        Ok(None)
    }
}
