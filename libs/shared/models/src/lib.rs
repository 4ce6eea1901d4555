pub mod availability;
pub mod error;
pub mod session;
pub mod text;
pub mod time;

pub use availability::{
    AvailabilityException, AvailabilityTemplate, AvailabilityWindow, SuggestedTime, TemplateSlot,
};
pub use error::{EngineError, ResourceKind};
pub use session::{
    ConflictSeverity, ConflictType, ResolutionStatus, ResourceSnapshot, ScheduleConflict,
    ScheduledSession, SchedulingSuggestion, SessionCategory, SessionStatus,
};
pub use text::{BilingualText, Locale};
pub use time::{weekday_index, DateRange, TimeWindow};
