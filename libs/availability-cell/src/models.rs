// libs/availability-cell/src/models.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_models::{AvailabilityWindow, BilingualText, TemplateSlot};

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: BilingualText,
    pub therapist_id: Option<Uuid>,
    pub slots: Vec<TemplateSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<BilingualText>,
    pub slots: Option<Vec<TemplateSlot>>,
    pub is_active: Option<bool>,
}

/// One calendar date with the windows that actually apply to it after the
/// recurring base, date-specific override, and exception layers are merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedDay {
    pub date: NaiveDate,
    pub windows: Vec<AvailabilityWindow>,
}

/// A collision encountered while instantiating a template. The window is
/// still created; the collision is reported so an administrator can decide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCollision {
    pub window_id: Uuid,
    pub date: NaiveDate,
    pub day_of_week: i32,
    pub existing_window_id: Option<Uuid>,
    pub exception_id: Option<Uuid>,
    pub description: BilingualText,
}

/// Outcome of applying a template onto a therapist's calendar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateApplication {
    pub template_id: Uuid,
    pub therapist_id: Uuid,
    pub start_date: NaiveDate,
    pub horizon_end: NaiveDate,
    pub created_windows: Vec<AvailabilityWindow>,
    pub conflicts: Vec<TemplateCollision>,
}
