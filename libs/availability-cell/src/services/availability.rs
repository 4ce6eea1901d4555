use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{
    AvailabilityException, AvailabilityWindow, DateRange, EngineError, ResourceKind,
};
use shared_store::RecordStore;

use crate::models::ResolvedDay;

/// Three-layer availability resolution for one calendar date: recurring
/// base, then date-specific override, then exception mask. Pure function so
/// it can be exercised independent of storage.
pub fn resolve_for_date(
    windows: &[AvailabilityWindow],
    exceptions: &[AvailabilityException],
    date: NaiveDate,
) -> Vec<AvailabilityWindow> {
    let mut applicable: Vec<AvailabilityWindow> = windows
        .iter()
        .filter(|w| w.applies_on(date))
        .cloned()
        .collect();

    // Date-specific windows replace the recurring base for that date.
    if applicable.iter().any(|w| w.specific_date == Some(date)) {
        applicable.retain(|w| w.specific_date == Some(date));
    }

    for exception in exceptions.iter().filter(|e| e.applies_on(date)) {
        match (
            exception.is_available,
            exception.start_time,
            exception.end_time,
        ) {
            // Full-day mask: the therapist is off regardless of windows.
            (false, None, _) | (false, _, None) => return vec![],
            // Partial-day time off: carve the span out of each window,
            // splitting windows that straddle it.
            (false, Some(ex_start), Some(ex_end)) => {
                applicable = applicable
                    .into_iter()
                    .flat_map(|w| {
                        if !(w.start_time < ex_end && ex_start < w.end_time) {
                            return vec![w];
                        }
                        let mut pieces = Vec::new();
                        if w.start_time < ex_start {
                            let mut left = w.clone();
                            left.end_time = ex_start;
                            pieces.push(left);
                        }
                        if ex_end < w.end_time {
                            let mut right = w;
                            right.start_time = ex_end;
                            pieces.push(right);
                        }
                        pieces
                    })
                    .collect();
            }
            // Selectively available: clip windows to the exception's span.
            (true, Some(ex_start), Some(ex_end)) => {
                applicable.retain(|w| w.start_time < ex_end && ex_start < w.end_time);
                for window in &mut applicable {
                    window.start_time = window.start_time.max(ex_start);
                    window.end_time = window.end_time.min(ex_end);
                }
            }
            (true, _, _) => {}
        }
    }

    applicable.sort_by_key(|w| (w.start_time, w.id));
    applicable
}

/// Stamp each resolved window with its booking count for the date.
pub fn apply_booking_counts(
    resolved: &mut [AvailabilityWindow],
    date: NaiveDate,
    counts: &HashMap<(Uuid, NaiveDate), i32>,
) {
    for window in resolved {
        window.current_bookings = counts.get(&(window.id, date)).copied().unwrap_or(0);
    }
}

/// Manages therapist availability windows and bookings against them.
pub struct AvailabilityService {
    store: Arc<dyn RecordStore>,
}

impl AvailabilityService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create or update a window. Validation failures reject the write
    /// before it reaches the store; `current_bookings` is never taken from
    /// the caller on update, the stored count is authoritative.
    pub async fn upsert_window(
        &self,
        mut window: AvailabilityWindow,
    ) -> Result<AvailabilityWindow, EngineError> {
        if window.start_time >= window.end_time {
            return Err(EngineError::InvalidInput(
                "window start time must be before end time".to_string(),
            ));
        }
        if window.max_sessions_per_slot < 1 {
            return Err(EngineError::InvalidInput(
                "window capacity must be at least 1".to_string(),
            ));
        }
        match (window.day_of_week, window.specific_date) {
            (Some(dow), None) => {
                if !(0..=6).contains(&dow) {
                    return Err(EngineError::InvalidInput(
                        "day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                    ));
                }
            }
            (None, Some(_)) => {}
            _ => {
                return Err(EngineError::InvalidInput(
                    "exactly one of day_of_week or specific_date must be set".to_string(),
                ));
            }
        }

        if let Some(existing) = self.store.get_window(window.id).await? {
            if window.max_sessions_per_slot < existing.current_bookings {
                return Err(EngineError::CapacityViolation(format!(
                    "cannot reduce capacity to {} below {} existing bookings",
                    window.max_sessions_per_slot, existing.current_bookings
                )));
            }
            window.current_bookings = existing.current_bookings;
            window.created_at = existing.created_at;
        } else if window.current_bookings != 0 {
            window.current_bookings = 0;
        }

        debug!("Upserting window {} for therapist {}", window.id, window.therapist_id);
        self.store.upsert_window(window).await
    }

    /// Delete a window. Rejected while bookings remain unless the caller
    /// explicitly forces removal.
    pub async fn delete_window(&self, id: Uuid, force: bool) -> Result<(), EngineError> {
        let window = self
            .store
            .get_window(id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Window, id))?;

        if window.current_bookings > 0 && !force {
            return Err(EngineError::CapacityViolation(format!(
                "window {} still has {} bookings; pass force to remove",
                id, window.current_bookings
            )));
        }
        if window.current_bookings > 0 {
            warn!(
                "Force-removing window {} with {} bookings",
                id, window.current_bookings
            );
        }
        self.store.delete_window(id).await
    }

    /// Resolve the windows applicable to each date in range, each carrying
    /// that date's booking count. Side-effect free and deterministic for
    /// identical inputs.
    pub async fn query(
        &self,
        therapist_id: Uuid,
        range: DateRange,
    ) -> Result<Vec<ResolvedDay>, EngineError> {
        let windows = self.store.windows_for_therapist(therapist_id).await?;
        let exceptions = self.store.exceptions_for_therapist(therapist_id).await?;
        let bookings = self.booking_counts(&windows).await?;

        Ok(range
            .days()
            .map(|date| {
                let mut resolved = resolve_for_date(&windows, &exceptions, date);
                apply_booking_counts(&mut resolved, date, &bookings);
                ResolvedDay {
                    date,
                    windows: resolved,
                }
            })
            .collect())
    }

    /// Resolve a single date. Convenience used by the conflict detector and
    /// generator hot paths.
    pub async fn resolve_date(
        &self,
        therapist_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, EngineError> {
        let windows = self.store.windows_for_therapist(therapist_id).await?;
        let exceptions = self.store.exceptions_for_therapist(therapist_id).await?;
        let bookings = self.booking_counts(&windows).await?;

        let mut resolved = resolve_for_date(&windows, &exceptions, date);
        apply_booking_counts(&mut resolved, date, &bookings);
        Ok(resolved)
    }

    /// Per-(window, date) booking counts for a set of windows.
    pub async fn booking_counts(
        &self,
        windows: &[AvailabilityWindow],
    ) -> Result<HashMap<(Uuid, NaiveDate), i32>, EngineError> {
        let mut counts = HashMap::new();
        for window in windows {
            for (date, count) in self.store.bookings_for_window(window.id).await? {
                counts.insert((window.id, date), count);
            }
        }
        Ok(counts)
    }

    /// Consume one unit of a window's capacity on one occurrence date. Only
    /// the generator and bulk coordinator call this, when a session is
    /// placed.
    pub async fn record_booking(
        &self,
        window_id: Uuid,
        date: NaiveDate,
    ) -> Result<i32, EngineError> {
        let window = self
            .store
            .get_window(window_id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Window, window_id))?;

        if !window.is_available || window.is_time_off {
            return Err(EngineError::CapacityViolation(format!(
                "window {} does not accept bookings",
                window_id
            )));
        }
        let booked = self
            .store
            .bookings_for_window(window_id)
            .await?
            .into_iter()
            .find(|(d, _)| *d == date)
            .map(|(_, count)| count)
            .unwrap_or(0);
        if booked >= window.max_sessions_per_slot {
            return Err(EngineError::CapacityViolation(format!(
                "window {} is fully booked on {} ({}/{})",
                window_id, date, booked, window.max_sessions_per_slot
            )));
        }
        self.store.adjust_booking(window_id, date, 1).await
    }

    /// Return one unit of capacity when a session is removed or moved.
    pub async fn release_booking(
        &self,
        window_id: Uuid,
        date: NaiveDate,
    ) -> Result<i32, EngineError> {
        let current = self
            .store
            .bookings_for_window(window_id)
            .await?
            .into_iter()
            .find(|(d, _)| *d == date)
            .map(|(_, count)| count)
            .unwrap_or(0);
        if current == 0 {
            warn!(
                "Releasing booking on window {} with zero bookings on {}",
                window_id, date
            );
            return Ok(0);
        }
        self.store.adjust_booking(window_id, date, -1).await
    }

    pub async fn upsert_exception(
        &self,
        exception: AvailabilityException,
    ) -> Result<AvailabilityException, EngineError> {
        if exception.start_date > exception.end_date {
            return Err(EngineError::InvalidInput(
                "exception start date must not be after end date".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (exception.start_time, exception.end_time) {
            if start >= end {
                return Err(EngineError::InvalidInput(
                    "exception start time must be before end time".to_string(),
                ));
            }
        }
        self.store.upsert_exception(exception).await
    }

    pub async fn delete_exception(&self, id: Uuid) -> Result<(), EngineError> {
        self.store.delete_exception(id).await
    }
}
