use async_trait::async_trait;
use uuid::Uuid;

/// Events pushed to affected parties after successful scheduling work.
/// Delivery is fire-and-forget: a notifier failure never rolls back the
/// scheduling result that triggered it.
#[derive(Debug, Clone)]
pub enum ScheduleEvent {
    ScheduleGenerated {
        therapist_id: Uuid,
        demand_id: Uuid,
        sessions_placed: usize,
        unscheduled_sessions: i32,
    },
    ScheduleOptimized {
        therapist_ids: Vec<Uuid>,
        relocations: usize,
        improvement_percentage: f32,
    },
    SessionsRescheduled {
        session_ids: Vec<Uuid>,
    },
    SessionsCancelled {
        session_ids: Vec<Uuid>,
    },
    SessionsModified {
        session_ids: Vec<Uuid>,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: ScheduleEvent) -> anyhow::Result<()>;
}

/// Default notifier that records events in the trace log. Deployments plug
/// in their own delivery mechanism.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: ScheduleEvent) -> anyhow::Result<()> {
        tracing::info!(?event, "schedule event");
        Ok(())
    }
}
