use std::collections::HashMap;

use uuid::Uuid;

use shared_models::{
    AvailabilityException, AvailabilityWindow, ConflictSeverity, ConflictType, DateRange,
    ResolutionStatus, ScheduledSession, SessionStatus,
};

use crate::models::{MetricsReport, OptimizationConfig, ResourceUtilization};
use crate::services::optimizer::{available_minutes, composite_score};

/// Read-side reducer over a session set and availability snapshot. No side
/// effects; safe to recompute on demand or on a schedule.
#[derive(Debug, Default)]
pub struct ScheduleMetricsService;

impl ScheduleMetricsService {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        sessions: &[ScheduledSession],
        windows: &[AvailabilityWindow],
        exceptions: &[AvailabilityException],
        period: DateRange,
    ) -> MetricsReport {
        let in_period: Vec<&ScheduledSession> = sessions
            .iter()
            .filter(|s| period.contains(s.date))
            .collect();
        let total = in_period.len() as i32;

        // Availability per therapist over the period, resolved through the
        // same three-layer function the generator uses.
        let mut available_by_therapist: HashMap<Uuid, i64> = HashMap::new();
        let mut therapist_ids: Vec<Uuid> = windows.iter().map(|w| w.therapist_id).collect();
        therapist_ids.sort();
        therapist_ids.dedup();
        for therapist_id in &therapist_ids {
            let own_windows: Vec<AvailabilityWindow> = windows
                .iter()
                .filter(|w| w.therapist_id == *therapist_id)
                .cloned()
                .collect();
            let own_exceptions: Vec<AvailabilityException> = exceptions
                .iter()
                .filter(|e| e.therapist_id == *therapist_id)
                .cloned()
                .collect();
            available_by_therapist.insert(
                *therapist_id,
                available_minutes(&own_windows, &own_exceptions, period),
            );
        }
        let total_available: i64 = available_by_therapist.values().sum();

        let therapist_utilization = utilization_by(&in_period, |s| Some(s.therapist_id), |id| {
            available_by_therapist.get(&id).copied().unwrap_or(0)
        });
        // Rooms and equipment carry no availability model of their own; the
        // schedulable time across all therapists is the denominator.
        let room_utilization = utilization_by(&in_period, |s| s.room_id, |_| total_available);
        let equipment_utilization = equipment_utilization(&in_period, total_available);

        let (conflicts_by_type, conflicts_by_severity, average_conflict_resolution_hours) =
            conflict_stats(&in_period);

        let count_status = |status: SessionStatus| {
            in_period.iter().filter(|s| s.status == status).count() as f32
        };
        let rate = |count: f32| {
            if total > 0 {
                count / total as f32 * 100.0
            } else {
                0.0
            }
        };

        let owned: Vec<ScheduledSession> = in_period.iter().map(|s| (*s).clone()).collect();
        let score = composite_score(
            &owned,
            &available_by_therapist,
            &OptimizationConfig::default(),
        );

        MetricsReport {
            period,
            total_sessions: total,
            therapist_utilization,
            room_utilization,
            equipment_utilization,
            conflicts_by_type,
            conflicts_by_severity,
            average_conflict_resolution_hours,
            reschedule_rate: rate(count_status(SessionStatus::Rescheduled)),
            no_show_rate: rate(count_status(SessionStatus::NoShow)),
            cancellation_rate: rate(count_status(SessionStatus::Cancelled)),
            schedule_optimization_score: score.composite,
        }
    }
}

fn utilization_by(
    sessions: &[&ScheduledSession],
    key: impl Fn(&ScheduledSession) -> Option<Uuid>,
    available: impl Fn(Uuid) -> i64,
) -> Vec<ResourceUtilization> {
    let mut booked: HashMap<Uuid, i64> = HashMap::new();
    for session in sessions.iter().filter(|s| s.blocks_resources()) {
        if let Some(id) = key(session) {
            *booked.entry(id).or_default() += session.duration_minutes as i64;
        }
    }

    let mut entries: Vec<ResourceUtilization> = booked
        .into_iter()
        .map(|(resource_id, booked_minutes)| {
            let available_minutes = available(resource_id);
            ResourceUtilization {
                resource_id,
                booked_minutes,
                available_minutes,
                utilization_percentage: if available_minutes > 0 {
                    (booked_minutes as f32 / available_minutes as f32 * 100.0).min(100.0)
                } else {
                    0.0
                },
            }
        })
        .collect();
    entries.sort_by_key(|e| e.resource_id);
    entries
}

fn equipment_utilization(
    sessions: &[&ScheduledSession],
    total_available: i64,
) -> Vec<ResourceUtilization> {
    let mut booked: HashMap<Uuid, i64> = HashMap::new();
    for session in sessions.iter().filter(|s| s.blocks_resources()) {
        for equipment_id in &session.equipment_ids {
            *booked.entry(*equipment_id).or_default() += session.duration_minutes as i64;
        }
    }

    let mut entries: Vec<ResourceUtilization> = booked
        .into_iter()
        .map(|(resource_id, booked_minutes)| ResourceUtilization {
            resource_id,
            booked_minutes,
            available_minutes: total_available,
            utilization_percentage: if total_available > 0 {
                (booked_minutes as f32 / total_available as f32 * 100.0).min(100.0)
            } else {
                0.0
            },
        })
        .collect();
    entries.sort_by_key(|e| e.resource_id);
    entries
}

#[allow(clippy::type_complexity)]
fn conflict_stats(
    sessions: &[&ScheduledSession],
) -> (
    Vec<(ConflictType, i32)>,
    Vec<(ConflictSeverity, i32)>,
    Option<f32>,
) {
    let mut by_type: HashMap<ConflictType, i32> = HashMap::new();
    let mut by_severity: HashMap<ConflictSeverity, i32> = HashMap::new();
    let mut latency_total_hours = 0.0f32;
    let mut latency_count = 0;

    for session in sessions {
        for conflict in &session.conflict_details {
            *by_type.entry(conflict.conflict_type).or_default() += 1;
            *by_severity.entry(conflict.severity).or_default() += 1;
            if conflict.resolution_status == ResolutionStatus::Resolved {
                if let Some(resolved_at) = conflict.resolved_at {
                    let hours =
                        (resolved_at - conflict.detected_at).num_minutes() as f32 / 60.0;
                    latency_total_hours += hours.max(0.0);
                    latency_count += 1;
                }
            }
        }
    }

    let mut by_type: Vec<(ConflictType, i32)> = by_type.into_iter().collect();
    by_type.sort_by_key(|(t, _)| format!("{:?}", t));
    let mut by_severity: Vec<(ConflictSeverity, i32)> = by_severity.into_iter().collect();
    by_severity.sort_by_key(|(s, _)| *s);

    let average = if latency_count > 0 {
        Some(latency_total_hours / latency_count as f32)
    } else {
        None
    };

    (by_type, by_severity, average)
}
