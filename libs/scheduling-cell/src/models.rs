// libs/scheduling-cell/src/models.rs
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::{
    BilingualText, ConflictSeverity, DateRange, ScheduleConflict, ScheduledSession,
    SchedulingSuggestion, SessionCategory, TimeWindow,
};

// ==============================================================================
// CONFLICT CHECK MODELS
// ==============================================================================

/// A candidate time slot to check before placing or moving a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room_id: Option<Uuid>,
    pub equipment_ids: Vec<Uuid>,
    pub student_id: Option<Uuid>,
    /// Session being edited, excluded from overlap scans.
    pub exclude_session_id: Option<Uuid>,
    /// When set, a back-to-back placement closer than this is reported as a
    /// low-severity advisory conflict. A preference, not a requirement.
    pub buffer_preference_minutes: Option<i64>,
}

impl CandidateSlot {
    pub fn new(
        therapist_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        Self {
            therapist_id,
            date,
            start_time,
            end_time,
            room_id: None,
            equipment_ids: vec![],
            student_id: None,
            exclude_session_id: None,
            buffer_preference_minutes: None,
        }
    }
}

/// Severity thresholds are policy, not constants: which conflicts the
/// optimizer may resolve automatically is configurable per deployment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeverityPolicy {
    pub auto_resolve_max: ConflictSeverity,
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            auto_resolve_max: ConflictSeverity::Medium,
        }
    }
}

impl SeverityPolicy {
    pub fn allows_auto_resolve(&self, severity: ConflictSeverity) -> bool {
        severity <= self.auto_resolve_max
    }
}

// ==============================================================================
// GENERATION MODELS
// ==============================================================================

/// Demand specification consumed by the schedule generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingRequest {
    /// The subscription/requirement the generated sessions satisfy.
    pub demand_id: Uuid,
    pub student_id: Option<Uuid>,
    pub preferred_therapist_id: Option<Uuid>,
    pub preferred_times: Vec<TimeWindow>,
    pub avoided_times: Vec<TimeWindow>,
    pub preferred_days: Vec<i32>, // 0 = Sunday .. 6 = Saturday
    pub avoided_days: Vec<i32>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_sessions: i32,
    pub sessions_per_week: i32,
    pub duration_minutes: i32,
    pub category: SessionCategory,
    pub priority: i32, // 1-5
    /// 0-100; at or above the configured threshold the generator accepts
    /// non-preferred or low-severity-conflicting placements rather than
    /// leaving demand unscheduled.
    pub flexibility_score: i32,
    pub require_consecutive_days: bool,
    pub max_gap_days: Option<i32>,
    pub room_id: Option<Uuid>,
    pub equipment_ids: Vec<Uuid>,
    pub is_billable: bool,
    pub timezone: String,
}

/// Output contract of the generator. Never partially committed: the caller
/// (or the engine facade) persists the sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub sessions: Vec<ScheduledSession>,
    pub conflicts: Vec<ScheduleConflict>,
    pub suggestions: Vec<SchedulingSuggestion>,
    pub unscheduled_sessions: i32,
    pub warnings: Vec<String>,
    pub optimization_score: f32,
    pub preference_match_score: f32,
    pub generation_time_ms: u64,
}

// ==============================================================================
// OPTIMIZATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationConfig {
    pub utilization_weight: f32,
    pub preference_weight: f32,
    pub gap_weight: f32,
    pub max_iterations: u32,
    /// Idle time beyond this between a therapist's consecutive sessions
    /// scores zero on the gap axis.
    pub max_gap_minutes: i64,
    /// Stated preference windows used for the preference-match sub-score.
    pub preferred_times: Vec<TimeWindow>,
    pub severity_policy: SeverityPolicy,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            utilization_weight: 0.4,
            preference_weight: 0.3,
            gap_weight: 0.3,
            max_iterations: 50,
            max_gap_minutes: 120,
            preferred_times: vec![],
            severity_policy: SeverityPolicy::default(),
        }
    }
}

/// Composite quality score with its sub-scores, all 0-100.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub utilization: f32,
    pub preference_match: f32,
    pub gap: f32,
    pub composite: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relocation {
    pub session_id: Uuid,
    pub from_date: NaiveDate,
    pub from_start: NaiveTime,
    pub to_date: NaiveDate,
    pub to_start: NaiveTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub sessions: Vec<ScheduledSession>,
    pub score_before: ScoreBreakdown,
    pub score_after: ScoreBreakdown,
    pub improvement_percentage: f32,
    pub iterations: u32,
    pub relocations: Vec<Relocation>,
    pub warnings: Vec<String>,
}

// ==============================================================================
// BULK OPERATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "operation", content = "params")]
pub enum BulkOperation {
    Reschedule {
        new_range: DateRange,
        new_therapist_id: Option<Uuid>,
    },
    Cancel {
        reason: BilingualText,
    },
    Modify {
        duration_minutes: Option<i32>,
        room_id: Option<Uuid>,
        equipment_ids: Option<Vec<Uuid>>,
        priority: Option<i32>,
        notes: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub successful_session_ids: Vec<Uuid>,
    pub failed_session_ids: Vec<Uuid>,
    pub conflict_session_ids: Vec<Uuid>,
    /// Per-item failure reasons, keyed by session id.
    pub failure_reasons: Vec<(Uuid, String)>,
    pub rollback_available: bool,
    /// Prior state of every session that was modified, for rollback.
    pub snapshots: Vec<ScheduledSession>,
    /// Sessions created by reschedule operations; rollback deletes these.
    pub created_session_ids: Vec<Uuid>,
}

impl BulkOperationResult {
    pub fn total_processed(&self) -> usize {
        self.successful_session_ids.len()
            + self.failed_session_ids.len()
            + self.conflict_session_ids.len()
    }
}

// ==============================================================================
// METRICS MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub resource_id: Uuid,
    pub booked_minutes: i64,
    pub available_minutes: i64,
    pub utilization_percentage: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub period: DateRange,
    pub total_sessions: i32,
    pub therapist_utilization: Vec<ResourceUtilization>,
    pub room_utilization: Vec<ResourceUtilization>,
    pub equipment_utilization: Vec<ResourceUtilization>,
    pub conflicts_by_type: Vec<(shared_models::ConflictType, i32)>,
    pub conflicts_by_severity: Vec<(ConflictSeverity, i32)>,
    pub average_conflict_resolution_hours: Option<f32>,
    pub reschedule_rate: f32,
    pub no_show_rate: f32,
    pub cancellation_rate: f32,
    pub schedule_optimization_score: f32,
}
