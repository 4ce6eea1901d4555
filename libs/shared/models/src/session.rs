use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::text::BilingualText;

// ==============================================================================
// CORE SESSION MODELS
// ==============================================================================

/// One concrete therapy session instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledSession {
    pub id: Uuid,
    pub session_number: String,
    /// The subscription/requirement this session satisfies.
    pub demand_id: Uuid,
    pub therapist_id: Uuid,
    pub student_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub equipment_ids: Vec<Uuid>,
    /// The availability window whose capacity this session consumes.
    pub availability_window_id: Option<Uuid>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i32,
    pub category: SessionCategory,
    pub priority: i32, // 1 (lowest) to 5 (highest)
    pub status: SessionStatus,
    pub has_conflicts: bool,
    pub conflict_details: Vec<ScheduleConflict>,
    pub resolution_status: ResolutionStatus,
    pub original_session_id: Option<Uuid>,
    pub reschedule_count: i32,
    pub optimization_score: Option<f32>, // 0-100, set by the optimizer
    pub cancellation_reason: Option<BilingualText>,
    pub is_billable: bool,
    pub timezone: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledSession {
    /// Half-open time-range overlap on the same date.
    pub fn overlaps(&self, date: NaiveDate, start: NaiveTime, end: NaiveTime) -> bool {
        self.date == date && self.start_time < end && start < self.end_time
    }

    /// Completed and cancelled sessions are read-only to the generator and
    /// optimizer.
    pub fn is_planning_locked(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Completed | SessionStatus::Cancelled
        )
    }

    /// Whether this session occupies its therapist/room/equipment for
    /// conflict purposes.
    pub fn blocks_resources(&self) -> bool {
        !matches!(
            self.status,
            SessionStatus::Cancelled | SessionStatus::Rescheduled | SessionStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
    Rescheduled,
}

impl SessionStatus {
    /// Forward transitions of the execution state machine. The engine itself
    /// only ever sets `Cancelled` and `Rescheduled`; the rest are driven by
    /// session-execution collaborators.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Scheduled, Confirmed) => true,
            (Confirmed, InProgress) => true,
            (InProgress, Completed) => true,
            (Scheduled | Confirmed, Cancelled | Rescheduled | NoShow) => true,
            (InProgress, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Confirmed => write!(f, "confirmed"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::NoShow => write!(f, "no_show"),
            SessionStatus::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionCategory {
    Therapy,
    Assessment,
    Consultation,
    Group,
    Evaluation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    InProgress,
    Resolved,
    Escalated,
    Ignored,
}

// ==============================================================================
// CONFLICT MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TherapistDoubleBooking,
    RoomUnavailable,
    EquipmentConflict,
    StudentUnavailable,
    TimeConstraint,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictSeverity::Low => write!(f, "low"),
            ConflictSeverity::Medium => write!(f, "medium"),
            ConflictSeverity::High => write!(f, "high"),
            ConflictSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A detected collision between two sessions, or between a session and
/// unavailable time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub id: Uuid,
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub therapist_id: Uuid,
    pub date: NaiveDate,
    /// The session being placed or edited. `None` while the candidate has
    /// not been persisted yet.
    pub session_id: Option<Uuid>,
    pub conflicting_session_id: Option<Uuid>,
    pub description: BilingualText,
    pub resolution_status: ResolutionStatus,
    pub suggestions: Vec<SchedulingSuggestion>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ScheduleConflict {
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.severity,
            ConflictSeverity::High | ConflictSeverity::Critical
        )
    }
}

/// Snapshot of resource availability attached to a suggestion, so callers
/// can rank alternatives without refetching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub window_id: Option<Uuid>,
    pub remaining_capacity: i32,
    pub room_free: Option<bool>,
    pub equipment_free: Option<bool>,
}

/// A candidate alternative placement for a session that could not be
/// scheduled as requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingSuggestion {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub therapist_id: Uuid,
    pub confidence: f32, // 0-100
    pub reasons: Vec<String>,
    pub trade_offs: Vec<String>,
    pub resources: ResourceSnapshot,
}
