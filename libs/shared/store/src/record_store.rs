use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use shared_models::{
    AvailabilityException, AvailabilityTemplate, AvailabilityWindow, EngineError,
    ScheduledSession, SessionStatus,
};

pub type StoreResult<T> = Result<T, EngineError>;

/// Range/filter query over scheduled sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionFilter {
    pub therapist_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub room_id: Option<Uuid>,
    pub equipment_id: Option<Uuid>,
    pub demand_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub statuses: Option<Vec<SessionStatus>>,
}

impl SessionFilter {
    pub fn for_therapist(therapist_id: Uuid) -> Self {
        Self {
            therapist_id: Some(therapist_id),
            ..Self::default()
        }
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from_date = Some(from);
        self.to_date = Some(to);
        self
    }

    pub fn matches(&self, session: &ScheduledSession) -> bool {
        if let Some(id) = self.therapist_id {
            if session.therapist_id != id {
                return false;
            }
        }
        if let Some(id) = self.student_id {
            if session.student_id != Some(id) {
                return false;
            }
        }
        if let Some(id) = self.room_id {
            if session.room_id != Some(id) {
                return false;
            }
        }
        if let Some(id) = self.equipment_id {
            if !session.equipment_ids.contains(&id) {
                return false;
            }
        }
        if let Some(id) = self.demand_id {
            if session.demand_id != id {
                return false;
            }
        }
        if let Some(from) = self.from_date {
            if session.date < from {
                return false;
            }
        }
        if let Some(to) = self.to_date {
            if session.date > to {
                return false;
            }
        }
        if let Some(ref statuses) = self.statuses {
            if !statuses.contains(&session.status) {
                return false;
            }
        }
        true
    }
}

/// Keyed record storage the engine schedules against. Implementations
/// provide last-write-wins upserts; session writes additionally support an
/// optimistic-concurrency check on `updated_at` so a caller acting on a
/// stale snapshot gets `ConcurrencyConflict` instead of a silent overwrite.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Availability windows
    async fn upsert_window(&self, window: AvailabilityWindow) -> StoreResult<AvailabilityWindow>;
    async fn delete_window(&self, id: Uuid) -> StoreResult<()>;
    async fn get_window(&self, id: Uuid) -> StoreResult<Option<AvailabilityWindow>>;
    async fn windows_for_therapist(&self, therapist_id: Uuid)
        -> StoreResult<Vec<AvailabilityWindow>>;
    /// Distinct therapist ids that have at least one availability window,
    /// in a stable order.
    async fn therapist_ids(&self) -> StoreResult<Vec<Uuid>>;

    // Booking ledger. A recurring window hosts bookings per occurrence
    // date, so counts are keyed by (window, date). The window row's
    // `current_bookings` mirrors its busiest occurrence.
    /// Change the booking count for one occurrence date by `delta`
    /// (clamped at zero) and return the new count for that date.
    async fn adjust_booking(
        &self,
        window_id: Uuid,
        date: NaiveDate,
        delta: i32,
    ) -> StoreResult<i32>;
    /// Per-date booking counts for a window, in date order.
    async fn bookings_for_window(&self, window_id: Uuid)
        -> StoreResult<Vec<(NaiveDate, i32)>>;

    // Templates
    async fn upsert_template(
        &self,
        template: AvailabilityTemplate,
    ) -> StoreResult<AvailabilityTemplate>;
    async fn get_template(&self, id: Uuid) -> StoreResult<Option<AvailabilityTemplate>>;
    async fn delete_template(&self, id: Uuid) -> StoreResult<()>;

    // Exceptions
    async fn upsert_exception(
        &self,
        exception: AvailabilityException,
    ) -> StoreResult<AvailabilityException>;
    async fn exceptions_for_therapist(
        &self,
        therapist_id: Uuid,
    ) -> StoreResult<Vec<AvailabilityException>>;
    async fn delete_exception(&self, id: Uuid) -> StoreResult<()>;

    // Sessions
    async fn upsert_session(
        &self,
        session: ScheduledSession,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> StoreResult<ScheduledSession>;
    async fn get_session(&self, id: Uuid) -> StoreResult<Option<ScheduledSession>>;
    async fn delete_session(&self, id: Uuid) -> StoreResult<()>;
    async fn sessions_matching(&self, filter: SessionFilter)
        -> StoreResult<Vec<ScheduledSession>>;
}
