use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use availability_cell::services::availability::resolve_for_date;
use shared_config::EngineConfig;
use shared_models::{
    AvailabilityException, AvailabilityWindow, DateRange, EngineError, ResolutionStatus,
    ScheduledSession, TimeWindow,
};
use shared_store::RecordStore;

use crate::models::{
    CandidateSlot, OptimizationConfig, OptimizationResult, Relocation, ScoreBreakdown,
};
use crate::services::conflict::{covering_window, detect, ConflictInputs};

// ==============================================================================
// SCORING FUNCTIONS (pure)
// ==============================================================================

/// Total bookable minutes a therapist offers across the range, after the
/// three-layer resolution.
pub fn available_minutes(
    windows: &[AvailabilityWindow],
    exceptions: &[AvailabilityException],
    range: DateRange,
) -> i64 {
    range
        .days()
        .map(|date| {
            resolve_for_date(windows, exceptions, date)
                .iter()
                .filter(|w| w.is_available && !w.is_time_off)
                .map(|w| w.duration_minutes())
                .sum::<i64>()
        })
        .sum()
}

/// Booked-minutes over available-minutes per therapist, averaged. 0-100.
pub fn utilization_score(
    sessions: &[ScheduledSession],
    available_by_therapist: &HashMap<Uuid, i64>,
) -> f32 {
    if available_by_therapist.is_empty() {
        return 0.0;
    }
    let mut booked: HashMap<Uuid, i64> = HashMap::new();
    for session in sessions.iter().filter(|s| s.blocks_resources()) {
        *booked.entry(session.therapist_id).or_default() += session.duration_minutes as i64;
    }

    let mut total = 0.0;
    for (therapist_id, available) in available_by_therapist {
        if *available <= 0 {
            continue;
        }
        let minutes = booked.get(therapist_id).copied().unwrap_or(0);
        total += (minutes as f32 / *available as f32).min(1.0) * 100.0;
    }
    total / available_by_therapist.len() as f32
}

/// Fraction of sessions inside a stated preference window. 0-100; an empty
/// preference list scores 100 (nothing to violate).
pub fn preference_match_score(sessions: &[ScheduledSession], preferred: &[TimeWindow]) -> f32 {
    if preferred.is_empty() {
        return 100.0;
    }
    if sessions.is_empty() {
        return 0.0;
    }
    let matched = sessions
        .iter()
        .filter(|s| preferred.iter().any(|p| p.contains(s.start_time, s.end_time)))
        .count();
    matched as f32 / sessions.len() as f32 * 100.0
}

/// Inverse of the average idle gap between a therapist's consecutive
/// same-day sessions, capped by `max_gap_minutes`. 0-100; a schedule with
/// no adjacent pairs scores 100.
pub fn gap_score(sessions: &[ScheduledSession], max_gap_minutes: i64) -> f32 {
    let mut by_day: HashMap<(Uuid, chrono::NaiveDate), Vec<&ScheduledSession>> = HashMap::new();
    for session in sessions.iter().filter(|s| s.blocks_resources()) {
        by_day
            .entry((session.therapist_id, session.date))
            .or_default()
            .push(session);
    }

    let mut gap_total = 0i64;
    let mut gap_count = 0i64;
    for day_sessions in by_day.values_mut() {
        day_sessions.sort_by_key(|s| s.start_time);
        for pair in day_sessions.windows(2) {
            let gap = (pair[1].start_time - pair[0].end_time).num_minutes().max(0);
            gap_total += gap.min(max_gap_minutes);
            gap_count += 1;
        }
    }

    if gap_count == 0 {
        return 100.0;
    }
    let average = gap_total as f32 / gap_count as f32;
    (1.0 - average / max_gap_minutes as f32).clamp(0.0, 1.0) * 100.0
}

/// Weighted composite of the three sub-scores.
pub fn composite_score(
    sessions: &[ScheduledSession],
    available_by_therapist: &HashMap<Uuid, i64>,
    config: &OptimizationConfig,
) -> ScoreBreakdown {
    let utilization = utilization_score(sessions, available_by_therapist);
    let preference_match = preference_match_score(sessions, &config.preferred_times);
    let gap = gap_score(sessions, config.max_gap_minutes);

    let weight_sum =
        (config.utilization_weight + config.preference_weight + config.gap_weight).max(f32::EPSILON);
    let composite = (utilization * config.utilization_weight
        + preference_match * config.preference_weight
        + gap * config.gap_weight)
        / weight_sum;

    ScoreBreakdown {
        utilization,
        preference_match,
        gap,
        composite,
    }
}

// ==============================================================================
// OPTIMIZER SERVICE
// ==============================================================================

/// Post-generation improvement pass. Hill-climbing: relocations are accepted
/// only on strict composite improvement, and the search stops at the
/// iteration cap or the first local optimum. This favors bounded runtime
/// over global optimality; it is a heuristic, not a solver.
pub struct ScheduleOptimizerService {
    store: Arc<dyn RecordStore>,
    config: EngineConfig,
}

struct TherapistCalendar {
    windows: Vec<AvailabilityWindow>,
    exceptions: Vec<AvailabilityException>,
    bookings: HashMap<(Uuid, chrono::NaiveDate), i32>,
}

impl ScheduleOptimizerService {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    #[instrument(skip(self, sessions, config), fields(session_count = sessions.len()))]
    pub async fn optimize(
        &self,
        sessions: Vec<ScheduledSession>,
        config: &OptimizationConfig,
    ) -> Result<OptimizationResult, EngineError> {
        let mut working = sessions;
        let mut warnings = Vec::new();
        let mut relocations = Vec::new();

        let range = match session_range(&working) {
            Some(range) => range,
            None => {
                let empty = ScoreBreakdown {
                    utilization: 0.0,
                    preference_match: 0.0,
                    gap: 0.0,
                    composite: 0.0,
                };
                return Ok(OptimizationResult {
                    sessions: working,
                    score_before: empty,
                    score_after: empty,
                    improvement_percentage: 0.0,
                    iterations: 0,
                    relocations,
                    warnings: vec!["no sessions to optimize".to_string()],
                });
            }
        };

        let calendars = self.load_calendars(&working).await?;
        let available_by_therapist: HashMap<Uuid, i64> = calendars
            .iter()
            .map(|(id, cal)| (*id, available_minutes(&cal.windows, &cal.exceptions, range)))
            .collect();

        let score_before = composite_score(&working, &available_by_therapist, config);
        let mut current = score_before;
        let mut iterations = 0;

        while iterations < config.max_iterations {
            iterations += 1;
            let best_move =
                self.find_best_move(&working, &calendars, &available_by_therapist, range, config);

            match best_move {
                Some((index, slot, window_id, score)) if score.composite > current.composite => {
                    let session = &mut working[index];
                    relocations.push(Relocation {
                        session_id: session.id,
                        from_date: session.date,
                        from_start: session.start_time,
                        to_date: slot.date,
                        to_start: slot.start_time,
                    });
                    debug!(
                        "Relocating session {} from {} {} to {} {}",
                        session.session_number,
                        session.date,
                        session.start_time,
                        slot.date,
                        slot.start_time
                    );
                    session.date = slot.date;
                    session.start_time = slot.start_time;
                    session.end_time = slot.end_time;
                    session.availability_window_id = Some(window_id);
                    session.has_conflicts = false;
                    for conflict in &mut session.conflict_details {
                        conflict.resolution_status = ResolutionStatus::Resolved;
                        conflict.resolved_at = Some(Utc::now());
                    }
                    session.updated_at = Utc::now();
                    current = score;
                }
                // No strictly improving move left: local optimum.
                _ => break,
            }
        }

        if iterations == config.max_iterations {
            warnings.push(
                "iteration cap reached; schedule may not be at a local optimum".to_string(),
            );
        }

        let score_after = composite_score(&working, &available_by_therapist, config);
        let improvement_percentage = if score_before.composite > 0.0 {
            (score_after.composite - score_before.composite) / score_before.composite * 100.0
        } else {
            0.0
        };

        info!(
            relocations = relocations.len(),
            improvement = improvement_percentage,
            "Optimization pass complete"
        );

        Ok(OptimizationResult {
            sessions: working,
            score_before,
            score_after,
            improvement_percentage,
            iterations,
            relocations,
            warnings,
        })
    }

    /// Steepest-ascent step: evaluate every movable session against every
    /// alternative slot and return the single best strictly-improving,
    /// conflict-free move.
    fn find_best_move(
        &self,
        working: &[ScheduledSession],
        calendars: &HashMap<Uuid, TherapistCalendar>,
        available_by_therapist: &HashMap<Uuid, i64>,
        range: DateRange,
        config: &OptimizationConfig,
    ) -> Option<(usize, CandidateSlot, Uuid, ScoreBreakdown)> {
        let mut best: Option<(usize, CandidateSlot, Uuid, ScoreBreakdown)> = None;

        for (index, session) in working.iter().enumerate() {
            if !self.is_movable(session, config) {
                continue;
            }
            let calendar = match calendars.get(&session.therapist_id) {
                Some(cal) => cal,
                None => continue,
            };

            let others: Vec<ScheduledSession> = working
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, s)| s.clone())
                .collect();

            for date in range.days() {
                let mut resolved =
                    resolve_for_date(&calendar.windows, &calendar.exceptions, date);
                for window in &mut resolved {
                    window.current_bookings = calendar
                        .bookings
                        .get(&(window.id, date))
                        .copied()
                        .unwrap_or(0);
                    // The session's own booking must not block its
                    // relocation within the same window occurrence.
                    if Some(window.id) == session.availability_window_id
                        && date == session.date
                        && window.current_bookings > 0
                    {
                        window.current_bookings -= 1;
                    }
                }

                for window in resolved.iter().filter(|w| w.is_bookable()) {
                    let mut start = window.start_time;
                    while (window.end_time - start).num_minutes()
                        >= session.duration_minutes as i64
                    {
                        let end = start + Duration::minutes(session.duration_minutes as i64);
                        let unchanged =
                            date == session.date && start == session.start_time;
                        if !unchanged {
                            let slot = CandidateSlot {
                                therapist_id: session.therapist_id,
                                date,
                                start_time: start,
                                end_time: end,
                                room_id: session.room_id,
                                equipment_ids: session.equipment_ids.clone(),
                                student_id: session.student_id,
                                exclude_session_id: Some(session.id),
                                buffer_preference_minutes: None,
                            };
                            if let Some(score) = self.evaluate_move(
                                working,
                                index,
                                &slot,
                                window,
                                &others,
                                &resolved,
                                available_by_therapist,
                                config,
                            ) {
                                let improves = match &best {
                                    Some((_, _, _, best_score)) => {
                                        score.composite > best_score.composite
                                    }
                                    None => true,
                                };
                                if improves {
                                    best = Some((index, slot, window.id, score));
                                }
                            }
                        }
                        start += Duration::minutes(self.config.slot_increment_minutes);
                    }
                }
            }
        }

        best
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_move(
        &self,
        working: &[ScheduledSession],
        index: usize,
        slot: &CandidateSlot,
        window: &AvailabilityWindow,
        others: &[ScheduledSession],
        resolved: &[AvailabilityWindow],
        available_by_therapist: &HashMap<Uuid, i64>,
        config: &OptimizationConfig,
    ) -> Option<ScoreBreakdown> {
        let room_sessions: Vec<ScheduledSession> = others
            .iter()
            .filter(|s| slot.room_id.is_some() && s.room_id == slot.room_id)
            .cloned()
            .collect();
        let equipment_sessions: Vec<ScheduledSession> = others
            .iter()
            .filter(|s| s.equipment_ids.iter().any(|e| slot.equipment_ids.contains(e)))
            .cloned()
            .collect();
        let student_sessions: Vec<ScheduledSession> = others
            .iter()
            .filter(|s| slot.student_id.is_some() && s.student_id == slot.student_id)
            .cloned()
            .collect();
        let therapist_sessions: Vec<ScheduledSession> = others
            .iter()
            .filter(|s| s.therapist_id == slot.therapist_id)
            .cloned()
            .collect();

        let inputs = ConflictInputs {
            resolved_windows: resolved,
            therapist_sessions: &therapist_sessions,
            room_sessions: &room_sessions,
            equipment_sessions: &equipment_sessions,
            student_sessions: &student_sessions,
        };

        // A relocation must not introduce any blocking conflict.
        let conflicts = detect(slot, &inputs);
        if conflicts.iter().any(|c| c.is_blocking()) {
            return None;
        }
        debug_assert!(covering_window(resolved, slot.start_time, slot.end_time).is_some());

        let mut trial: Vec<ScheduledSession> = working.to_vec();
        trial[index].date = slot.date;
        trial[index].start_time = slot.start_time;
        trial[index].end_time = slot.end_time;
        trial[index].availability_window_id = Some(window.id);

        Some(composite_score(&trial, available_by_therapist, config))
    }

    /// Completed/cancelled sessions are read-only; sessions carrying an
    /// unresolved blocking conflict above the auto-resolve policy are left
    /// for manual resolution.
    fn is_movable(&self, session: &ScheduledSession, config: &OptimizationConfig) -> bool {
        if session.is_planning_locked() || !session.blocks_resources() {
            return false;
        }
        session
            .conflict_details
            .iter()
            .filter(|c| c.resolution_status == ResolutionStatus::Pending)
            .all(|c| config.severity_policy.allows_auto_resolve(c.severity))
    }

    async fn load_calendars(
        &self,
        sessions: &[ScheduledSession],
    ) -> Result<HashMap<Uuid, TherapistCalendar>, EngineError> {
        let mut therapist_ids: Vec<Uuid> = sessions.iter().map(|s| s.therapist_id).collect();
        therapist_ids.sort();
        therapist_ids.dedup();

        let fetches = therapist_ids.iter().map(|id| {
            let store = Arc::clone(&self.store);
            let id = *id;
            async move {
                let windows = store.windows_for_therapist(id).await?;
                let exceptions = store.exceptions_for_therapist(id).await?;
                let mut bookings = HashMap::new();
                for window in &windows {
                    for (date, count) in store.bookings_for_window(window.id).await? {
                        bookings.insert((window.id, date), count);
                    }
                }
                Ok::<_, EngineError>((
                    id,
                    TherapistCalendar {
                        windows,
                        exceptions,
                        bookings,
                    },
                ))
            }
        });

        let results = futures::future::join_all(fetches).await;
        let mut calendars = HashMap::new();
        for result in results {
            let (id, calendar) = result?;
            calendars.insert(id, calendar);
        }
        Ok(calendars)
    }
}

fn session_range(sessions: &[ScheduledSession]) -> Option<DateRange> {
    let min = sessions.iter().map(|s| s.date).min()?;
    let max = sessions.iter().map(|s| s.date).max()?;
    Some(DateRange::new(min, max))
}
