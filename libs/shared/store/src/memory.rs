use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_models::{
    AvailabilityException, AvailabilityTemplate, AvailabilityWindow, EngineError, ResourceKind,
    ScheduledSession,
};

use crate::record_store::{RecordStore, SessionFilter, StoreResult};

/// Reference `RecordStore` backed by in-process maps. Used by the test
/// suites and by embedders that do not need durable storage.
#[derive(Default)]
pub struct InMemoryStore {
    windows: RwLock<HashMap<Uuid, AvailabilityWindow>>,
    templates: RwLock<HashMap<Uuid, AvailabilityTemplate>>,
    exceptions: RwLock<HashMap<Uuid, AvailabilityException>>,
    sessions: RwLock<HashMap<Uuid, ScheduledSession>>,
    bookings: RwLock<HashMap<(Uuid, NaiveDate), i32>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn upsert_window(&self, mut window: AvailabilityWindow) -> StoreResult<AvailabilityWindow> {
        window.updated_at = Utc::now();
        let mut windows = self.windows.write().await;
        windows.insert(window.id, window.clone());
        debug!("Window {} upserted", window.id);
        Ok(window)
    }

    async fn delete_window(&self, id: Uuid) -> StoreResult<()> {
        let mut windows = self.windows.write().await;
        windows
            .remove(&id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Window, id))?;
        drop(windows);
        let mut bookings = self.bookings.write().await;
        bookings.retain(|(window_id, _), _| *window_id != id);
        Ok(())
    }

    async fn get_window(&self, id: Uuid) -> StoreResult<Option<AvailabilityWindow>> {
        Ok(self.windows.read().await.get(&id).cloned())
    }

    async fn windows_for_therapist(
        &self,
        therapist_id: Uuid,
    ) -> StoreResult<Vec<AvailabilityWindow>> {
        let windows = self.windows.read().await;
        let mut result: Vec<AvailabilityWindow> = windows
            .values()
            .filter(|w| w.therapist_id == therapist_id)
            .cloned()
            .collect();
        result.sort_by_key(|w| (w.specific_date, w.day_of_week, w.start_time, w.id));
        Ok(result)
    }

    async fn therapist_ids(&self) -> StoreResult<Vec<Uuid>> {
        let windows = self.windows.read().await;
        let mut ids: Vec<Uuid> = windows.values().map(|w| w.therapist_id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn adjust_booking(
        &self,
        window_id: Uuid,
        date: NaiveDate,
        delta: i32,
    ) -> StoreResult<i32> {
        let new_count;
        let busiest;
        {
            let mut bookings = self.bookings.write().await;
            let entry = bookings.entry((window_id, date)).or_insert(0);
            *entry = (*entry + delta).max(0);
            new_count = *entry;
            if new_count == 0 {
                bookings.remove(&(window_id, date));
            }
            busiest = bookings
                .iter()
                .filter(|((id, _), _)| *id == window_id)
                .map(|(_, count)| *count)
                .max()
                .unwrap_or(0);
        }

        let mut windows = self.windows.write().await;
        if let Some(window) = windows.get_mut(&window_id) {
            window.current_bookings = busiest;
            window.updated_at = Utc::now();
        }
        Ok(new_count)
    }

    async fn bookings_for_window(
        &self,
        window_id: Uuid,
    ) -> StoreResult<Vec<(NaiveDate, i32)>> {
        let bookings = self.bookings.read().await;
        let mut counts: Vec<(NaiveDate, i32)> = bookings
            .iter()
            .filter(|((id, _), _)| *id == window_id)
            .map(|((_, date), count)| (*date, *count))
            .collect();
        counts.sort();
        Ok(counts)
    }

    async fn upsert_template(
        &self,
        mut template: AvailabilityTemplate,
    ) -> StoreResult<AvailabilityTemplate> {
        template.updated_at = Utc::now();
        let mut templates = self.templates.write().await;
        templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: Uuid) -> StoreResult<Option<AvailabilityTemplate>> {
        Ok(self.templates.read().await.get(&id).cloned())
    }

    async fn delete_template(&self, id: Uuid) -> StoreResult<()> {
        let mut templates = self.templates.write().await;
        templates
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(ResourceKind::Template, id))
    }

    async fn upsert_exception(
        &self,
        exception: AvailabilityException,
    ) -> StoreResult<AvailabilityException> {
        let mut exceptions = self.exceptions.write().await;
        exceptions.insert(exception.id, exception.clone());
        Ok(exception)
    }

    async fn exceptions_for_therapist(
        &self,
        therapist_id: Uuid,
    ) -> StoreResult<Vec<AvailabilityException>> {
        let exceptions = self.exceptions.read().await;
        let mut result: Vec<AvailabilityException> = exceptions
            .values()
            .filter(|e| e.therapist_id == therapist_id)
            .cloned()
            .collect();
        result.sort_by_key(|e| (e.start_date, e.id));
        Ok(result)
    }

    async fn delete_exception(&self, id: Uuid) -> StoreResult<()> {
        let mut exceptions = self.exceptions.write().await;
        exceptions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(ResourceKind::Exception, id))
    }

    async fn upsert_session(
        &self,
        mut session: ScheduledSession,
        expected_updated_at: Option<DateTime<Utc>>,
    ) -> StoreResult<ScheduledSession> {
        let mut sessions = self.sessions.write().await;
        if let Some(expected) = expected_updated_at {
            if let Some(current) = sessions.get(&session.id) {
                if current.updated_at != expected {
                    return Err(EngineError::ConcurrencyConflict(session.id));
                }
            }
        }
        session.updated_at = Utc::now();
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<ScheduledSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn delete_session(&self, id: Uuid) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::not_found(ResourceKind::Session, id))
    }

    async fn sessions_matching(
        &self,
        filter: SessionFilter,
    ) -> StoreResult<Vec<ScheduledSession>> {
        let sessions = self.sessions.read().await;
        let mut result: Vec<ScheduledSession> = sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        result.sort_by_key(|s| (s.date, s.start_time, s.id));
        Ok(result)
    }
}
