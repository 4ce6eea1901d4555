use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::services::availability::resolve_for_date;
use shared_config::EngineConfig;
use shared_models::{
    weekday_index, AvailabilityException, AvailabilityWindow, ConflictSeverity, DateRange,
    EngineError, ResolutionStatus, ResourceSnapshot, ScheduleConflict, ScheduledSession,
    SchedulingSuggestion, SessionStatus,
};
use shared_store::{RecordStore, SessionFilter};

use crate::models::{CandidateSlot, OptimizationConfig, SchedulingRequest, SchedulingResult};
use crate::services::conflict::{detect, ConflictInputs};
use crate::services::optimizer::{available_minutes, composite_score, preference_match_score};

/// Greedy week-by-week allocator. Deterministic and replayable: given an
/// identical availability/session snapshot and request, it produces an
/// identical session set. It never commits anything itself; the caller
/// persists the returned result.
pub struct ScheduleGeneratorService {
    store: Arc<dyn RecordStore>,
    config: EngineConfig,
}

struct TherapistSnapshot {
    windows: Vec<AvailabilityWindow>,
    exceptions: Vec<AvailabilityException>,
    sessions: Vec<ScheduledSession>,
    /// Committed booking counts per (window, date).
    bookings: HashMap<(Uuid, NaiveDate), i32>,
}

struct Placement {
    session: ScheduledSession,
    conflicts: Vec<ScheduleConflict>,
}

impl ScheduleGeneratorService {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self, request), fields(demand_id = %request.demand_id))]
    pub async fn generate(
        &self,
        request: &SchedulingRequest,
    ) -> Result<SchedulingResult, EngineError> {
        let started = Instant::now();
        validate_request(request)?;

        let therapist_order = match request.preferred_therapist_id {
            Some(id) => vec![id],
            None => self.store.therapist_ids().await?,
        };

        let mut warnings = Vec::new();
        if therapist_order.is_empty() {
            warnings.push("no therapists with availability windows exist".to_string());
            return Ok(empty_result(request, warnings, started));
        }

        let snapshots = self
            .load_snapshots(&therapist_order, request.start_date, request.end_date)
            .await?;
        let dimension_sessions = self.load_dimension_sessions(request).await?;

        let candidate_weekdays = candidate_weekdays(request);
        if candidate_weekdays.is_empty() {
            warnings.push("preferred/avoided day constraints leave no candidate weekdays".to_string());
            return Ok(empty_result(request, warnings, started));
        }

        let mut planned: Vec<ScheduledSession> = Vec::new();
        let mut planned_bookings: HashMap<(Uuid, NaiveDate), i32> = HashMap::new();
        let mut conflicts_out: Vec<ScheduleConflict> = Vec::new();
        let mut suggestions_out: Vec<SchedulingSuggestion> = Vec::new();
        let mut sequence = 0;

        let mut week_start = request.start_date;
        while week_start <= request.end_date && (planned.len() as i32) < request.total_sessions {
            let week_end = (week_start + Duration::days(6)).min(request.end_date);
            let needed =
                (request.total_sessions - planned.len() as i32).min(request.sessions_per_week);

            let mut placed_this_week = 0;
            let mut last_placed_date: Option<NaiveDate> = None;

            let mut date = week_start;
            while date <= week_end && placed_this_week < needed {
                if !candidate_weekdays.contains(&weekday_index(date)) {
                    date += Duration::days(1);
                    continue;
                }
                if request.require_consecutive_days {
                    if let Some(prev) = last_placed_date {
                        if date != prev + Duration::days(1) {
                            date += Duration::days(1);
                            continue;
                        }
                    }
                }

                let placement = self.try_place(
                    request,
                    date,
                    &therapist_order,
                    &snapshots,
                    &planned,
                    &planned_bookings,
                    &dimension_sessions,
                    sequence + 1,
                );

                if let Some(placement) = placement {
                    if let Some(window_id) = placement.session.availability_window_id {
                        *planned_bookings.entry((window_id, date)).or_default() += 1;
                    }
                    conflicts_out.extend(placement.conflicts.clone());
                    planned.push(placement.session);
                    placed_this_week += 1;
                    sequence += 1;
                    last_placed_date = Some(date);
                }
                date += Duration::days(1);
            }

            if placed_this_week < needed {
                let shortfall = needed - placed_this_week;
                warnings.push(format!(
                    "week of {}: only {} of {} requested sessions could be placed",
                    week_start, placed_this_week, needed
                ));
                let mut alternatives = self.shortfall_suggestions(
                    request,
                    week_start,
                    week_end,
                    &therapist_order,
                    &snapshots,
                    &planned,
                    &planned_bookings,
                    &dimension_sessions,
                );
                alternatives.truncate(self.config.suggestion_limit);
                suggestions_out.extend(alternatives);
                debug!(
                    "Shortfall of {} in week of {} for demand {}",
                    shortfall, week_start, request.demand_id
                );
            }

            week_start += Duration::days(7);
        }

        let unscheduled = request.total_sessions - planned.len() as i32;
        if unscheduled > 0 {
            warnings.push(format!(
                "requested cadence infeasible given availability: {} of {} sessions unscheduled",
                unscheduled, request.total_sessions
            ));
        }
        if let Some(max_gap) = request.max_gap_days {
            let mut dates: Vec<NaiveDate> = planned.iter().map(|s| s.date).collect();
            dates.sort();
            if dates
                .windows(2)
                .any(|pair| (pair[1] - pair[0]).num_days() > max_gap as i64)
            {
                warnings.push(format!(
                    "schedule contains gaps longer than the requested maximum of {} days",
                    max_gap
                ));
            }
        }

        let scoring_config = OptimizationConfig {
            preferred_times: request.preferred_times.clone(),
            ..OptimizationConfig::default()
        };
        let range = DateRange::new(request.start_date, request.end_date);
        let available_by_therapist: HashMap<Uuid, i64> = planned
            .iter()
            .map(|s| s.therapist_id)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .filter_map(|id| {
                snapshots.get(&id).map(|snapshot| {
                    (
                        id,
                        available_minutes(&snapshot.windows, &snapshot.exceptions, range),
                    )
                })
            })
            .collect();

        let score = composite_score(&planned, &available_by_therapist, &scoring_config);
        let preference_score = preference_match_score(&planned, &request.preferred_times);

        info!(
            placed = planned.len(),
            unscheduled,
            conflicts = conflicts_out.len(),
            "Schedule generation complete for demand {}",
            request.demand_id
        );

        Ok(SchedulingResult {
            sessions: planned,
            conflicts: conflicts_out,
            suggestions: suggestions_out,
            unscheduled_sessions: unscheduled,
            warnings,
            optimization_score: score.composite,
            preference_match_score: preference_score,
            generation_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Place one session on `date` if possible. Tries every therapist in
    /// order and every slot in their resolved windows; the first
    /// conflict-free candidate wins. When none is conflict-free, the
    /// lowest-severity candidate is accepted only for flexible demand.
    #[allow(clippy::too_many_arguments)]
    fn try_place(
        &self,
        request: &SchedulingRequest,
        date: NaiveDate,
        therapist_order: &[Uuid],
        snapshots: &HashMap<Uuid, TherapistSnapshot>,
        planned: &[ScheduledSession],
        planned_bookings: &HashMap<(Uuid, NaiveDate), i32>,
        dimension_sessions: &DimensionSessions,
        sequence: i32,
    ) -> Option<Placement> {
        let duration = request.duration_minutes as i64;
        let mut best_conflicted: Option<(ConflictSeverity, i64, Placement)> = None;

        for therapist_id in therapist_order {
            let snapshot = match snapshots.get(therapist_id) {
                Some(snapshot) => snapshot,
                None => continue,
            };
            let resolved = effective_windows(snapshot, date, planned_bookings);

            let therapist_sessions = combined_for_therapist(snapshot, planned, *therapist_id);
            let room_sessions = dimension_sessions.room_with_planned(request, planned);
            let equipment_sessions = dimension_sessions.equipment_with_planned(request, planned);
            let student_sessions = dimension_sessions.student_with_planned(request, planned);

            let mut slots: Vec<(i64, NaiveTime)> = Vec::new();
            for window in resolved.iter().filter(|w| w.is_bookable()) {
                let mut start = window.start_time;
                while (window.end_time - start).num_minutes() >= duration {
                    let end = start + Duration::minutes(duration);
                    let avoided = request
                        .avoided_times
                        .iter()
                        .any(|a| a.overlaps(start, end));
                    if !avoided {
                        slots.push((preferred_distance(request, start), start));
                    }
                    start += Duration::minutes(self.config.slot_increment_minutes);
                }
            }
            // Candidates overlapping a preferred window sort first.
            slots.sort();
            slots.dedup_by_key(|(_, start)| *start);

            for (_, start) in slots {
                let end = start + Duration::minutes(duration);
                let candidate = CandidateSlot {
                    therapist_id: *therapist_id,
                    date,
                    start_time: start,
                    end_time: end,
                    room_id: request.room_id,
                    equipment_ids: request.equipment_ids.clone(),
                    student_id: request.student_id,
                    exclude_session_id: None,
                    buffer_preference_minutes: None,
                };
                let inputs = ConflictInputs {
                    resolved_windows: &resolved,
                    therapist_sessions: &therapist_sessions,
                    room_sessions: &room_sessions,
                    equipment_sessions: &equipment_sessions,
                    student_sessions: &student_sessions,
                };
                let conflicts = detect(&candidate, &inputs);

                let window_id = resolved
                    .iter()
                    .find(|w| w.covers(start, end) && w.is_bookable())
                    .map(|w| w.id);

                if conflicts.is_empty() {
                    return Some(Placement {
                        session: self.build_session(
                            request, sequence, *therapist_id, window_id, date, start, end, &[],
                        ),
                        conflicts: vec![],
                    });
                }

                let worst = conflicts
                    .iter()
                    .map(|c| c.severity)
                    .max()
                    .unwrap_or(ConflictSeverity::Low);
                let key = preferred_distance(request, start);
                let better = match &best_conflicted {
                    Some((best_sev, best_key, _)) => {
                        (worst, key) < (*best_sev, *best_key)
                    }
                    None => true,
                };
                if better {
                    let session = self.build_session(
                        request, sequence, *therapist_id, window_id, date, start, end, &conflicts,
                    );
                    best_conflicted = Some((worst, key, Placement { session, conflicts }));
                }
            }
        }

        // Flexible demand accepts the least-bad conflicted slot rather than
        // going unscheduled.
        if request.flexibility_score >= self.config.flexibility_threshold {
            if let Some((severity, _, placement)) = best_conflicted {
                warn!(
                    "Accepting conflicted placement (severity {}) for flexible demand {}",
                    severity, request.demand_id
                );
                return Some(placement);
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn build_session(
        &self,
        request: &SchedulingRequest,
        sequence: i32,
        therapist_id: Uuid,
        window_id: Option<Uuid>,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        conflicts: &[ScheduleConflict],
    ) -> ScheduledSession {
        let demand_tag: String = request.demand_id.simple().to_string()[..8].to_string();
        ScheduledSession {
            id: Uuid::new_v4(),
            session_number: format!("THS-{}-{:03}", demand_tag, sequence),
            demand_id: request.demand_id,
            therapist_id,
            student_id: request.student_id,
            room_id: request.room_id,
            equipment_ids: request.equipment_ids.clone(),
            availability_window_id: window_id,
            date,
            start_time: start,
            end_time: end,
            duration_minutes: request.duration_minutes,
            category: request.category,
            priority: request.priority,
            status: SessionStatus::Scheduled,
            has_conflicts: !conflicts.is_empty(),
            conflict_details: conflicts.to_vec(),
            resolution_status: ResolutionStatus::Pending,
            original_session_id: None,
            reschedule_count: 0,
            optimization_score: None,
            cancellation_reason: None,
            is_billable: request.is_billable,
            timezone: request.timezone.clone(),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Conflict-free alternatives for a week that could not be filled,
    /// scanning every weekday (not just the candidate set). Confidence
    /// weighs preference match, resource fit, and cadence proximity.
    #[allow(clippy::too_many_arguments)]
    fn shortfall_suggestions(
        &self,
        request: &SchedulingRequest,
        week_start: NaiveDate,
        week_end: NaiveDate,
        therapist_order: &[Uuid],
        snapshots: &HashMap<Uuid, TherapistSnapshot>,
        planned: &[ScheduledSession],
        planned_bookings: &HashMap<(Uuid, NaiveDate), i32>,
        dimension_sessions: &DimensionSessions,
    ) -> Vec<SchedulingSuggestion> {
        let duration = request.duration_minutes as i64;
        let mut suggestions = Vec::new();

        let mut date = week_start;
        while date <= week_end {
            for therapist_id in therapist_order {
                let snapshot = match snapshots.get(therapist_id) {
                    Some(snapshot) => snapshot,
                    None => continue,
                };
                let resolved = effective_windows(snapshot, date, planned_bookings);
                let therapist_sessions = combined_for_therapist(snapshot, planned, *therapist_id);
                let room_sessions = dimension_sessions.room_with_planned(request, planned);
                let equipment_sessions =
                    dimension_sessions.equipment_with_planned(request, planned);
                let student_sessions = dimension_sessions.student_with_planned(request, planned);

                for window in resolved.iter().filter(|w| w.is_bookable()) {
                    let mut start = window.start_time;
                    while (window.end_time - start).num_minutes() >= duration {
                        let end = start + Duration::minutes(duration);
                        let candidate = CandidateSlot {
                            therapist_id: *therapist_id,
                            date,
                            start_time: start,
                            end_time: end,
                            room_id: request.room_id,
                            equipment_ids: request.equipment_ids.clone(),
                            student_id: request.student_id,
                            exclude_session_id: None,
                            buffer_preference_minutes: None,
                        };
                        let inputs = ConflictInputs {
                            resolved_windows: &resolved,
                            therapist_sessions: &therapist_sessions,
                            room_sessions: &room_sessions,
                            equipment_sessions: &equipment_sessions,
                            student_sessions: &student_sessions,
                        };
                        if detect(&candidate, &inputs).is_empty() {
                            let preference = if request.preferred_times.is_empty() {
                                100.0
                            } else {
                                let distance = preferred_distance(request, start) as f32;
                                (100.0 - distance / 6.0).clamp(0.0, 100.0)
                            };
                            let resource_fit = window.remaining_capacity() as f32
                                / window.max_sessions_per_slot as f32
                                * 100.0;
                            let cadence = {
                                let offset = (date - week_start).num_days() as f32;
                                (100.0 - offset * 10.0).clamp(0.0, 100.0)
                            };
                            let confidence =
                                (preference * 0.4 + resource_fit * 0.3 + cadence * 0.3)
                                    .clamp(0.0, 100.0);

                            suggestions.push(SchedulingSuggestion {
                                date,
                                start_time: start,
                                end_time: end,
                                therapist_id: *therapist_id,
                                confidence,
                                reasons: vec![format!(
                                    "Open {}-minute slot within the requested week",
                                    request.duration_minutes
                                )],
                                trade_offs: if candidate_weekdays(request)
                                    .contains(&weekday_index(date))
                                {
                                    vec![]
                                } else {
                                    vec!["falls outside the preferred weekdays".to_string()]
                                },
                                resources: ResourceSnapshot {
                                    window_id: Some(window.id),
                                    remaining_capacity: window.remaining_capacity(),
                                    room_free: request.room_id.map(|_| room_sessions.is_empty()),
                                    equipment_free: if request.equipment_ids.is_empty() {
                                        None
                                    } else {
                                        Some(equipment_sessions.is_empty())
                                    },
                                },
                            });
                        }
                        start += Duration::minutes(self.config.slot_increment_minutes);
                    }
                }
            }
            date += Duration::days(1);
        }

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        suggestions
    }

    async fn load_snapshots(
        &self,
        therapist_ids: &[Uuid],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<HashMap<Uuid, TherapistSnapshot>, EngineError> {
        let fetches = therapist_ids.iter().map(|id| {
            let store = Arc::clone(&self.store);
            let id = *id;
            async move {
                let windows = store.windows_for_therapist(id).await?;
                let exceptions = store.exceptions_for_therapist(id).await?;
                let sessions = store
                    .sessions_matching(SessionFilter::for_therapist(id).between(start, end))
                    .await?;
                let mut bookings = HashMap::new();
                for window in &windows {
                    for (date, count) in store.bookings_for_window(window.id).await? {
                        bookings.insert((window.id, date), count);
                    }
                }
                Ok::<_, EngineError>((
                    id,
                    TherapistSnapshot {
                        windows,
                        exceptions,
                        sessions,
                        bookings,
                    },
                ))
            }
        });

        let results = futures::future::join_all(fetches).await;
        let mut snapshots = HashMap::new();
        for result in results {
            let (id, snapshot) = result?;
            snapshots.insert(id, snapshot);
        }
        Ok(snapshots)
    }

    async fn load_dimension_sessions(
        &self,
        request: &SchedulingRequest,
    ) -> Result<DimensionSessions, EngineError> {
        let range_filter = |mut filter: SessionFilter| {
            filter.from_date = Some(request.start_date);
            filter.to_date = Some(request.end_date);
            filter
        };

        let room = match request.room_id {
            Some(room_id) => {
                self.store
                    .sessions_matching(range_filter(SessionFilter {
                        room_id: Some(room_id),
                        ..SessionFilter::default()
                    }))
                    .await?
            }
            None => vec![],
        };

        let mut equipment = Vec::new();
        for equipment_id in &request.equipment_ids {
            equipment.extend(
                self.store
                    .sessions_matching(range_filter(SessionFilter {
                        equipment_id: Some(*equipment_id),
                        ..SessionFilter::default()
                    }))
                    .await?,
            );
        }
        equipment.sort_by_key(|s| s.id);
        equipment.dedup_by_key(|s| s.id);

        let student = match request.student_id {
            Some(student_id) => {
                self.store
                    .sessions_matching(range_filter(SessionFilter {
                        student_id: Some(student_id),
                        ..SessionFilter::default()
                    }))
                    .await?
            }
            None => vec![],
        };

        Ok(DimensionSessions {
            room,
            equipment,
            student,
        })
    }
}

/// Stored sessions scoped to the request's room/equipment/student, fetched
/// once per generation run.
struct DimensionSessions {
    room: Vec<ScheduledSession>,
    equipment: Vec<ScheduledSession>,
    student: Vec<ScheduledSession>,
}

impl DimensionSessions {
    fn room_with_planned(
        &self,
        request: &SchedulingRequest,
        planned: &[ScheduledSession],
    ) -> Vec<ScheduledSession> {
        let mut sessions = self.room.clone();
        if request.room_id.is_some() {
            sessions.extend(
                planned
                    .iter()
                    .filter(|s| s.room_id == request.room_id)
                    .cloned(),
            );
        }
        sessions
    }

    fn equipment_with_planned(
        &self,
        request: &SchedulingRequest,
        planned: &[ScheduledSession],
    ) -> Vec<ScheduledSession> {
        let mut sessions = self.equipment.clone();
        if !request.equipment_ids.is_empty() {
            sessions.extend(
                planned
                    .iter()
                    .filter(|s| {
                        s.equipment_ids
                            .iter()
                            .any(|e| request.equipment_ids.contains(e))
                    })
                    .cloned(),
            );
        }
        sessions
    }

    fn student_with_planned(
        &self,
        request: &SchedulingRequest,
        planned: &[ScheduledSession],
    ) -> Vec<ScheduledSession> {
        let mut sessions = self.student.clone();
        if request.student_id.is_some() {
            sessions.extend(
                planned
                    .iter()
                    .filter(|s| s.student_id == request.student_id)
                    .cloned(),
            );
        }
        sessions
    }
}

fn combined_for_therapist(
    snapshot: &TherapistSnapshot,
    planned: &[ScheduledSession],
    therapist_id: Uuid,
) -> Vec<ScheduledSession> {
    let mut sessions = snapshot.sessions.clone();
    sessions.extend(
        planned
            .iter()
            .filter(|s| s.therapist_id == therapist_id)
            .cloned(),
    );
    sessions
}

/// Resolved windows for a date carrying that date's committed booking
/// counts plus the in-flight planned ones, so intra-batch placements see
/// each other's capacity consumption.
fn effective_windows(
    snapshot: &TherapistSnapshot,
    date: NaiveDate,
    planned_bookings: &HashMap<(Uuid, NaiveDate), i32>,
) -> Vec<AvailabilityWindow> {
    let mut resolved = resolve_for_date(&snapshot.windows, &snapshot.exceptions, date);
    for window in &mut resolved {
        let committed = snapshot
            .bookings
            .get(&(window.id, date))
            .copied()
            .unwrap_or(0);
        let planned = planned_bookings
            .get(&(window.id, date))
            .copied()
            .unwrap_or(0);
        window.current_bookings = committed + planned;
    }
    resolved
}

fn candidate_weekdays(request: &SchedulingRequest) -> Vec<i32> {
    let mut days: Vec<i32> = if !request.preferred_days.is_empty() {
        request.preferred_days.clone()
    } else {
        (0..=6)
            .filter(|d| !request.avoided_days.contains(d))
            .collect()
    };
    days.sort();
    days.dedup();
    days
}

/// Distance in minutes from a candidate start to the nearest preferred
/// window; zero when no preferences are stated.
fn preferred_distance(request: &SchedulingRequest, start: NaiveTime) -> i64 {
    request
        .preferred_times
        .iter()
        .map(|w| w.distance_minutes(start))
        .min()
        .unwrap_or(0)
}

fn validate_request(request: &SchedulingRequest) -> Result<(), EngineError> {
    if request.start_date >= request.end_date {
        return Err(EngineError::InvalidInput(
            "start date must be before end date".to_string(),
        ));
    }
    if request.total_sessions <= 0 {
        return Err(EngineError::InvalidInput(
            "total sessions must be positive".to_string(),
        ));
    }
    if request.sessions_per_week <= 0 {
        return Err(EngineError::InvalidInput(
            "sessions per week must be positive".to_string(),
        ));
    }
    if request.duration_minutes <= 0 {
        return Err(EngineError::InvalidInput(
            "session duration must be positive".to_string(),
        ));
    }
    if !(1..=5).contains(&request.priority) {
        return Err(EngineError::InvalidInput(
            "priority must be between 1 and 5".to_string(),
        ));
    }
    if !(0..=100).contains(&request.flexibility_score) {
        return Err(EngineError::InvalidInput(
            "flexibility score must be between 0 and 100".to_string(),
        ));
    }
    for day in request
        .preferred_days
        .iter()
        .chain(request.avoided_days.iter())
    {
        if !(0..=6).contains(day) {
            return Err(EngineError::InvalidInput(
                "weekday indices must be between 0 and 6".to_string(),
            ));
        }
    }
    Ok(())
}

fn empty_result(
    request: &SchedulingRequest,
    warnings: Vec<String>,
    started: Instant,
) -> SchedulingResult {
    SchedulingResult {
        sessions: vec![],
        conflicts: vec![],
        suggestions: vec![],
        unscheduled_sessions: request.total_sessions,
        warnings,
        optimization_score: 0.0,
        preference_match_score: 0.0,
        generation_time_ms: started.elapsed().as_millis() as u64,
    }
}
