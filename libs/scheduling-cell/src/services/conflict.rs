use std::sync::Arc;

use chrono::{Duration, NaiveTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use availability_cell::services::availability::AvailabilityService;
use shared_config::EngineConfig;
use shared_models::{
    AvailabilityWindow, BilingualText, ConflictSeverity, ConflictType, EngineError,
    ResolutionStatus, ResourceSnapshot, ScheduleConflict, ScheduledSession, SchedulingSuggestion,
    SessionStatus,
};
use shared_store::{RecordStore, SessionFilter};

use crate::models::CandidateSlot;

/// Per-dimension session snapshots the pure detector scans. Each slice is
/// already scoped to the candidate's date.
#[derive(Debug, Default)]
pub struct ConflictInputs<'a> {
    pub resolved_windows: &'a [AvailabilityWindow],
    pub therapist_sessions: &'a [ScheduledSession],
    pub room_sessions: &'a [ScheduledSession],
    pub equipment_sessions: &'a [ScheduledSession],
    pub student_sessions: &'a [ScheduledSession],
}

/// First bookable window fully covering `[start, end)`, if any.
pub fn covering_window<'a>(
    windows: &'a [AvailabilityWindow],
    start: NaiveTime,
    end: NaiveTime,
) -> Option<&'a AvailabilityWindow> {
    windows
        .iter()
        .find(|w| w.covers(start, end) && w.is_bookable())
}

/// Classify every collision for a candidate slot. Pure over its inputs:
/// detection never mutates state, so two runs over the same snapshot return
/// the same conflict list.
pub fn detect(candidate: &CandidateSlot, inputs: &ConflictInputs) -> Vec<ScheduleConflict> {
    let mut conflicts = Vec::new();

    // (a) Availability coverage for the therapist on this date.
    if covering_window(inputs.resolved_windows, candidate.start_time, candidate.end_time).is_none()
    {
        let covering_but_blocked = inputs
            .resolved_windows
            .iter()
            .find(|w| w.covers(candidate.start_time, candidate.end_time));

        let (conflict_type, description) = match covering_but_blocked {
            Some(w) if w.is_time_off => (
                ConflictType::TimeConstraint,
                BilingualText::new(
                    "Requested time falls inside the therapist's time off",
                    "الوقت المطلوب يقع ضمن إجازة الأخصائي",
                ),
            ),
            Some(w) if !w.is_available => (
                ConflictType::TimeConstraint,
                BilingualText::new(
                    "The covering availability window is disabled",
                    "فترة التوفر المطابقة غير مفعلة",
                ),
            ),
            Some(_) => (
                ConflictType::TherapistDoubleBooking,
                BilingualText::new(
                    "The covering availability window is fully booked",
                    "فترة التوفر المطابقة محجوزة بالكامل",
                ),
            ),
            None => (
                ConflictType::TimeConstraint,
                BilingualText::new(
                    "No availability window covers the requested time",
                    "لا توجد فترة توفر تغطي الوقت المطلوب",
                ),
            ),
        };

        conflicts.push(new_conflict(
            candidate,
            conflict_type,
            ConflictSeverity::High,
            None,
            description,
        ));
    }

    // (b) Therapist double-booking scan.
    for existing in overlapping(inputs.therapist_sessions, candidate) {
        let severity = match existing.status {
            SessionStatus::Confirmed | SessionStatus::InProgress => ConflictSeverity::Critical,
            _ => ConflictSeverity::High,
        };
        conflicts.push(new_conflict(
            candidate,
            ConflictType::TherapistDoubleBooking,
            severity,
            Some(existing.id),
            BilingualText::new(
                format!(
                    "Therapist already has session {} from {} to {}",
                    existing.session_number, existing.start_time, existing.end_time
                ),
                format!(
                    "لدى الأخصائي جلسة {} من {} إلى {}",
                    existing.session_number, existing.start_time, existing.end_time
                ),
            ),
        ));
    }

    // Advisory: back-to-back against a stated buffer preference.
    if let Some(buffer) = candidate.buffer_preference_minutes {
        for existing in inputs
            .therapist_sessions
            .iter()
            .filter(|s| s.date == candidate.date && s.blocks_resources())
            .filter(|s| Some(s.id) != candidate.exclude_session_id)
        {
            let gap_before = (candidate.start_time - existing.end_time).num_minutes();
            let gap_after = (existing.start_time - candidate.end_time).num_minutes();
            let adjacent = (0..buffer).contains(&gap_before) || (0..buffer).contains(&gap_after);
            if adjacent {
                conflicts.push(new_conflict(
                    candidate,
                    ConflictType::TimeConstraint,
                    ConflictSeverity::Low,
                    Some(existing.id),
                    BilingualText::new(
                        format!("Less than {} minutes break around session {}", buffer, existing.session_number),
                        format!("استراحة أقل من {} دقيقة حول الجلسة {}", buffer, existing.session_number),
                    ),
                ));
            }
        }
    }

    // (c) Room overlap scan.
    if candidate.room_id.is_some() {
        for existing in overlapping(inputs.room_sessions, candidate) {
            conflicts.push(new_conflict(
                candidate,
                ConflictType::RoomUnavailable,
                ConflictSeverity::High,
                Some(existing.id),
                BilingualText::new(
                    format!("Room is occupied by session {}", existing.session_number),
                    format!("الغرفة مشغولة بالجلسة {}", existing.session_number),
                ),
            ));
        }
    }

    // (d) Equipment overlap scan.
    if !candidate.equipment_ids.is_empty() {
        for existing in overlapping(inputs.equipment_sessions, candidate) {
            conflicts.push(new_conflict(
                candidate,
                ConflictType::EquipmentConflict,
                ConflictSeverity::High,
                Some(existing.id),
                BilingualText::new(
                    format!("Equipment is in use by session {}", existing.session_number),
                    format!("المعدات مستخدمة في الجلسة {}", existing.session_number),
                ),
            ));
        }
    }

    // (e) Student overlap scan.
    if candidate.student_id.is_some() {
        for existing in overlapping(inputs.student_sessions, candidate) {
            conflicts.push(new_conflict(
                candidate,
                ConflictType::StudentUnavailable,
                ConflictSeverity::High,
                Some(existing.id),
                BilingualText::new(
                    format!("Student already attends session {}", existing.session_number),
                    format!("الطالب لديه الجلسة {} في نفس الوقت", existing.session_number),
                ),
            ));
        }
    }

    conflicts
}

fn overlapping<'a>(
    sessions: &'a [ScheduledSession],
    candidate: &'a CandidateSlot,
) -> impl Iterator<Item = &'a ScheduledSession> {
    sessions
        .iter()
        .filter(move |s| Some(s.id) != candidate.exclude_session_id)
        .filter(|s| s.blocks_resources())
        .filter(move |s| s.overlaps(candidate.date, candidate.start_time, candidate.end_time))
}

fn new_conflict(
    candidate: &CandidateSlot,
    conflict_type: ConflictType,
    severity: ConflictSeverity,
    conflicting_session_id: Option<Uuid>,
    description: BilingualText,
) -> ScheduleConflict {
    ScheduleConflict {
        id: Uuid::new_v4(),
        conflict_type,
        severity,
        therapist_id: candidate.therapist_id,
        date: candidate.date,
        session_id: candidate.exclude_session_id,
        conflicting_session_id,
        description,
        resolution_status: ResolutionStatus::Pending,
        suggestions: vec![],
        detected_at: Utc::now(),
        resolved_at: None,
    }
}

/// Store-backed conflict detection: resolves the availability snapshot and
/// scoped session sets, then runs the pure detector. Reentrant and
/// lock-free; never mutates anything.
pub struct ConflictDetectionService {
    store: Arc<dyn RecordStore>,
    availability: AvailabilityService,
    config: EngineConfig,
}

impl ConflictDetectionService {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        let availability = AvailabilityService::new(Arc::clone(&store));
        Self {
            store,
            availability,
            config,
        }
    }

    pub async fn check(
        &self,
        candidate: &CandidateSlot,
    ) -> Result<Vec<ScheduleConflict>, EngineError> {
        debug!(
            "Checking conflicts for therapist {} on {} {}-{}",
            candidate.therapist_id, candidate.date, candidate.start_time, candidate.end_time
        );

        let snapshot = self.load_inputs(candidate).await?;
        let mut conflicts = detect(candidate, &snapshot.as_inputs());

        if conflicts.iter().any(|c| c.is_blocking()) {
            let suggestions = self
                .suggest_alternatives(candidate, self.config.suggestion_limit)
                .await
                .unwrap_or_default();
            for conflict in conflicts.iter_mut().filter(|c| c.is_blocking()) {
                conflict.suggestions = suggestions.clone();
            }
            warn!(
                "Conflicts detected for therapist {}: {} entries",
                candidate.therapist_id,
                conflicts.len()
            );
        }

        Ok(conflicts)
    }

    /// Enumerate conflict-free alternatives near the requested slot: the
    /// same day first, then the following week, ranked by confidence.
    pub async fn suggest_alternatives(
        &self,
        candidate: &CandidateSlot,
        limit: usize,
    ) -> Result<Vec<SchedulingSuggestion>, EngineError> {
        let duration = (candidate.end_time - candidate.start_time).num_minutes();
        let mut suggestions = Vec::new();

        for day_offset in 0..=7 {
            let date = candidate.date + Duration::days(day_offset);
            let shifted = CandidateSlot {
                date,
                ..candidate.clone()
            };
            let snapshot = self.load_inputs(&shifted).await?;

            for window in snapshot.resolved_windows.iter().filter(|w| w.is_bookable()) {
                let mut start = window.start_time;
                while (window.end_time - start).num_minutes() >= duration {
                    let end = start + Duration::minutes(duration);
                    let same_as_original = day_offset == 0 && start == candidate.start_time;
                    if !same_as_original {
                        let probe = CandidateSlot {
                            date,
                            start_time: start,
                            end_time: end,
                            ..candidate.clone()
                        };
                        if detect(&probe, &snapshot.as_inputs()).is_empty() {
                            suggestions.push(self.build_suggestion(
                                &probe,
                                window,
                                day_offset,
                                &snapshot,
                            ));
                        }
                    }
                    start += Duration::minutes(self.config.slot_increment_minutes);
                }
            }

            if suggestions.len() >= limit * 2 {
                break;
            }
        }

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions.truncate(limit);
        Ok(suggestions)
    }

    fn build_suggestion(
        &self,
        probe: &CandidateSlot,
        window: &AvailabilityWindow,
        day_offset: i64,
        snapshot: &LoadedInputs,
    ) -> SchedulingSuggestion {
        // Same-day alternatives rank highest; confidence decays with
        // distance from the requested date and start time.
        let time_distance =
            (probe.start_time - window.start_time).num_minutes().abs() as f32 / 60.0;
        let confidence = (90.0 - day_offset as f32 * 12.0 - time_distance * 2.0).clamp(10.0, 95.0);

        let mut reasons = vec![format!(
            "Therapist has open capacity {} of {}",
            window.remaining_capacity(),
            window.max_sessions_per_slot
        )];
        let mut trade_offs = Vec::new();
        if day_offset == 0 {
            reasons.push("Same day as requested".to_string());
        } else {
            trade_offs.push(format!("{} day(s) after the requested date", day_offset));
        }

        SchedulingSuggestion {
            date: probe.date,
            start_time: probe.start_time,
            end_time: probe.end_time,
            therapist_id: probe.therapist_id,
            confidence,
            reasons,
            trade_offs,
            resources: ResourceSnapshot {
                window_id: Some(window.id),
                remaining_capacity: window.remaining_capacity(),
                room_free: probe.room_id.map(|_| snapshot.room_sessions.is_empty()),
                equipment_free: if probe.equipment_ids.is_empty() {
                    None
                } else {
                    Some(snapshot.equipment_sessions.is_empty())
                },
            },
        }
    }

    async fn load_inputs(&self, candidate: &CandidateSlot) -> Result<LoadedInputs, EngineError> {
        let resolved_windows = self
            .availability
            .resolve_date(candidate.therapist_id, candidate.date)
            .await?;

        let day_filter = |mut filter: SessionFilter| {
            filter.from_date = Some(candidate.date);
            filter.to_date = Some(candidate.date);
            filter
        };

        let therapist_sessions = self
            .store
            .sessions_matching(day_filter(SessionFilter::for_therapist(candidate.therapist_id)))
            .await?;

        let room_sessions = match candidate.room_id {
            Some(room_id) => {
                self.store
                    .sessions_matching(day_filter(SessionFilter {
                        room_id: Some(room_id),
                        ..SessionFilter::default()
                    }))
                    .await?
            }
            None => vec![],
        };

        let mut equipment_sessions = Vec::new();
        for equipment_id in &candidate.equipment_ids {
            equipment_sessions.extend(
                self.store
                    .sessions_matching(day_filter(SessionFilter {
                        equipment_id: Some(*equipment_id),
                        ..SessionFilter::default()
                    }))
                    .await?,
            );
        }
        equipment_sessions.sort_by_key(|s| s.id);
        equipment_sessions.dedup_by_key(|s| s.id);

        let student_sessions = match candidate.student_id {
            Some(student_id) => {
                self.store
                    .sessions_matching(day_filter(SessionFilter {
                        student_id: Some(student_id),
                        ..SessionFilter::default()
                    }))
                    .await?
            }
            None => vec![],
        };

        Ok(LoadedInputs {
            resolved_windows,
            therapist_sessions,
            room_sessions,
            equipment_sessions,
            student_sessions,
        })
    }
}

/// Owned snapshot backing `ConflictInputs`.
pub struct LoadedInputs {
    pub resolved_windows: Vec<AvailabilityWindow>,
    pub therapist_sessions: Vec<ScheduledSession>,
    pub room_sessions: Vec<ScheduledSession>,
    pub equipment_sessions: Vec<ScheduledSession>,
    pub student_sessions: Vec<ScheduledSession>,
}

impl LoadedInputs {
    pub fn as_inputs(&self) -> ConflictInputs<'_> {
        ConflictInputs {
            resolved_windows: &self.resolved_windows,
            therapist_sessions: &self.therapist_sessions,
            room_sessions: &self.room_sessions,
            equipment_sessions: &self.equipment_sessions,
            student_sessions: &self.student_sessions,
        }
    }
}
