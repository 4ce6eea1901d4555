use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use shared_config::EngineConfig;
use shared_models::{
    AvailabilityTemplate, AvailabilityWindow, BilingualText, EngineError, ResourceKind,
    TemplateSlot, weekday_index,
};
use shared_store::RecordStore;

use crate::models::{
    CreateTemplateRequest, TemplateApplication, TemplateCollision, UpdateTemplateRequest,
};
use crate::services::availability::AvailabilityService;

/// Named weekly availability patterns and their instantiation onto a
/// therapist's calendar.
pub struct TemplateService {
    store: Arc<dyn RecordStore>,
    availability: AvailabilityService,
    config: EngineConfig,
}

impl TemplateService {
    pub fn new(store: Arc<dyn RecordStore>, config: EngineConfig) -> Self {
        let availability = AvailabilityService::new(Arc::clone(&store));
        Self {
            store,
            availability,
            config,
        }
    }

    pub async fn create_template(
        &self,
        request: CreateTemplateRequest,
    ) -> Result<AvailabilityTemplate, EngineError> {
        validate_slots(&request.slots)?;

        let template = AvailabilityTemplate {
            id: Uuid::new_v4(),
            name: request.name,
            therapist_id: request.therapist_id,
            slots: request.slots,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.store.upsert_template(template).await
    }

    pub async fn update_template(
        &self,
        template_id: Uuid,
        request: UpdateTemplateRequest,
    ) -> Result<AvailabilityTemplate, EngineError> {
        let mut template = self
            .store
            .get_template(template_id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Template, template_id))?;

        if let Some(name) = request.name {
            template.name = name;
        }
        if let Some(slots) = request.slots {
            validate_slots(&slots)?;
            template.slots = slots;
        }
        if let Some(is_active) = request.is_active {
            template.is_active = is_active;
        }
        self.store.upsert_template(template).await
    }

    /// Expand a template's weekly pattern into concrete recurring windows
    /// for a therapist, starting at `start_date` and extending over the
    /// configured horizon. Collisions with existing date-specific windows
    /// or exceptions do not abort the batch; every window is still created
    /// and each collision is reported in the returned list.
    #[instrument(skip(self), fields(template_id = %template_id, therapist_id = %therapist_id))]
    pub async fn apply(
        &self,
        template_id: Uuid,
        therapist_id: Uuid,
        start_date: NaiveDate,
    ) -> Result<TemplateApplication, EngineError> {
        let template = self
            .store
            .get_template(template_id)
            .await?
            .ok_or_else(|| EngineError::not_found(ResourceKind::Template, template_id))?;

        if !template.is_active {
            return Err(EngineError::InvalidInput(format!(
                "template {} is not active",
                template_id
            )));
        }

        let horizon_days = self.config.template_horizon_weeks as i64 * 7;
        let horizon_end = start_date + Duration::days(horizon_days - 1);

        let existing_windows = self.store.windows_for_therapist(therapist_id).await?;
        let exceptions = self.store.exceptions_for_therapist(therapist_id).await?;

        let mut created_windows = Vec::with_capacity(template.slots.len());
        let mut conflicts = Vec::new();

        for slot in &template.slots {
            let window = AvailabilityWindow {
                id: Uuid::new_v4(),
                therapist_id,
                day_of_week: Some(slot.day_of_week),
                specific_date: None,
                start_time: slot.start_time,
                end_time: slot.end_time,
                is_recurring: true,
                max_sessions_per_slot: slot.max_sessions_per_slot,
                current_bookings: 0,
                is_available: true,
                is_time_off: false,
                time_off_reason: None,
                notes: None,
                timezone: "UTC".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };

            let window = self.availability.upsert_window(window).await?;
            conflicts.extend(collisions_for_slot(
                &window,
                slot,
                start_date,
                horizon_end,
                &existing_windows,
                &exceptions,
            ));
            created_windows.push(window);
        }

        debug!(
            "Template {} applied to therapist {}: {} windows, {} collisions",
            template_id,
            therapist_id,
            created_windows.len(),
            conflicts.len()
        );

        Ok(TemplateApplication {
            template_id,
            therapist_id,
            start_date,
            horizon_end,
            created_windows,
            conflicts,
        })
    }
}

fn validate_slots(slots: &[TemplateSlot]) -> Result<(), EngineError> {
    if slots.is_empty() {
        return Err(EngineError::InvalidInput(
            "template must contain at least one slot".to_string(),
        ));
    }
    for slot in slots {
        if slot.start_time >= slot.end_time {
            return Err(EngineError::InvalidInput(
                "template slot start time must be before end time".to_string(),
            ));
        }
        if !(0..=6).contains(&slot.day_of_week) {
            return Err(EngineError::InvalidInput(
                "template slot day of week must be between 0 and 6".to_string(),
            ));
        }
        if slot.max_sessions_per_slot < 1 {
            return Err(EngineError::InvalidInput(
                "template slot capacity must be at least 1".to_string(),
            ));
        }
    }
    Ok(())
}

/// Scan every horizon date matching the slot's weekday for existing
/// non-recurring commitments that overlap it.
fn collisions_for_slot(
    window: &AvailabilityWindow,
    slot: &TemplateSlot,
    start_date: NaiveDate,
    horizon_end: NaiveDate,
    existing_windows: &[AvailabilityWindow],
    exceptions: &[shared_models::AvailabilityException],
) -> Vec<TemplateCollision> {
    let mut collisions = Vec::new();

    let mut date = start_date;
    while date <= horizon_end {
        if weekday_index(date) == slot.day_of_week {
            for existing in existing_windows {
                if existing.specific_date == Some(date)
                    && existing.start_time < slot.end_time
                    && slot.start_time < existing.end_time
                {
                    collisions.push(TemplateCollision {
                        window_id: window.id,
                        date,
                        day_of_week: slot.day_of_week,
                        existing_window_id: Some(existing.id),
                        exception_id: None,
                        description: BilingualText::new(
                            format!("Template slot overlaps an existing window on {}", date),
                            format!("فترة القالب تتعارض مع فترة موجودة في {}", date),
                        ),
                    });
                }
            }
            for exception in exceptions {
                if !exception.applies_on(date) {
                    continue;
                }
                let overlaps = match (exception.start_time, exception.end_time) {
                    (Some(ex_start), Some(ex_end)) => {
                        ex_start < slot.end_time && slot.start_time < ex_end
                    }
                    _ => true,
                };
                if overlaps {
                    collisions.push(TemplateCollision {
                        window_id: window.id,
                        date,
                        day_of_week: slot.day_of_week,
                        existing_window_id: None,
                        exception_id: Some(exception.id),
                        description: BilingualText::new(
                            format!("Template slot collides with an exception on {}", date),
                            format!("فترة القالب تتعارض مع استثناء في {}", date),
                        ),
                    });
                }
            }
        }
        date += Duration::days(1);
    }

    collisions
}
