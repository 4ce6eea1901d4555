use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// What kind of record a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Therapist,
    Room,
    Equipment,
    Template,
    Window,
    Exception,
    Session,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Therapist => write!(f, "therapist"),
            ResourceKind::Room => write!(f, "room"),
            ResourceKind::Equipment => write!(f, "equipment"),
            ResourceKind::Template => write!(f, "template"),
            ResourceKind::Window => write!(f, "availability window"),
            ResourceKind::Exception => write!(f, "availability exception"),
            ResourceKind::Session => write!(f, "session"),
        }
    }
}

/// Hard failures surfaced to callers. Infeasible demand is never an error;
/// it is reported as shortfalls and warnings inside the scheduling result.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Capacity violation: {0}")]
    CapacityViolation(String),

    #[error("{kind} not found: {id}")]
    ResourceNotFound { kind: ResourceKind, id: Uuid },

    #[error("Record {0} was modified concurrently; refetch and retry")]
    ConcurrencyConflict(Uuid),

    #[error("Store error: {0}")]
    Store(String),
}

impl EngineError {
    pub fn not_found(kind: ResourceKind, id: Uuid) -> Self {
        EngineError::ResourceNotFound { kind, id }
    }
}
