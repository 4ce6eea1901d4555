use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::models::TemplateApplication;
use availability_cell::services::availability::AvailabilityService;
use availability_cell::services::template::TemplateService;
use shared_config::EngineConfig;
use shared_models::{
    AvailabilityException, AvailabilityWindow, DateRange, EngineError, ScheduleConflict,
    ScheduledSession,
};
use shared_store::{Notifier, RecordStore, ScheduleEvent, SessionFilter};

use crate::models::{
    BulkOperation, BulkOperationResult, CandidateSlot, MetricsReport, OptimizationConfig,
    OptimizationResult, SchedulingRequest, SchedulingResult,
};
use crate::services::bulk::BulkOperationsService;
use crate::services::conflict::ConflictDetectionService;
use crate::services::generator::ScheduleGeneratorService;
use crate::services::metrics::ScheduleMetricsService;
use crate::services::optimizer::ScheduleOptimizerService;

/// In-process critical sections keyed by therapist id. The allocation
/// algorithms are read-then-write and not commutative: two writers that
/// observe the same free slot would both commit it. Every snapshot →
/// compute → write sequence for a therapist runs under that therapist's
/// lock; locks are always acquired in sorted id order.
#[derive(Default)]
pub struct TherapistLockRegistry {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl TherapistLockRegistry {
    pub async fn lock_one(&self, therapist_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(therapist_id)
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    pub async fn lock_many(&self, mut therapist_ids: Vec<Uuid>) -> Vec<OwnedMutexGuard<()>> {
        therapist_ids.sort();
        therapist_ids.dedup();
        let mut guards = Vec::with_capacity(therapist_ids.len());
        for therapist_id in therapist_ids {
            guards.push(self.lock_one(therapist_id).await);
        }
        guards
    }
}

/// Facade over the whole engine: generation, optimization, conflict checks,
/// bulk edits, and metrics, with per-therapist write serialization and
/// fire-and-forget notification.
pub struct SchedulingEngine {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    availability: AvailabilityService,
    templates: TemplateService,
    conflict_service: ConflictDetectionService,
    generator: ScheduleGeneratorService,
    optimizer: ScheduleOptimizerService,
    bulk: BulkOperationsService,
    metrics: ScheduleMetricsService,
    locks: TherapistLockRegistry,
}

impl SchedulingEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            availability: AvailabilityService::new(Arc::clone(&store)),
            templates: TemplateService::new(Arc::clone(&store), config.clone()),
            conflict_service: ConflictDetectionService::new(Arc::clone(&store), config.clone()),
            generator: ScheduleGeneratorService::new(Arc::clone(&store), config.clone()),
            optimizer: ScheduleOptimizerService::new(Arc::clone(&store), config.clone()),
            bulk: BulkOperationsService::new(Arc::clone(&store), config),
            metrics: ScheduleMetricsService::new(),
            store,
            notifier,
            locks: TherapistLockRegistry::default(),
        }
    }

    pub fn availability(&self) -> &AvailabilityService {
        &self.availability
    }

    pub fn templates(&self) -> &TemplateService {
        &self.templates
    }

    /// Compute a schedule without committing anything. Replayable: the
    /// caller persists the result, or uses `generate_and_commit`.
    pub async fn generate_schedule(
        &self,
        request: &SchedulingRequest,
    ) -> Result<SchedulingResult, EngineError> {
        self.generator.generate(request).await
    }

    /// Generate and persist in one per-therapist critical section, then
    /// notify affected parties. The notifier runs detached; its failure
    /// never rolls back the committed schedule.
    #[instrument(skip(self, request), fields(demand_id = %request.demand_id))]
    pub async fn generate_and_commit(
        &self,
        request: &SchedulingRequest,
    ) -> Result<SchedulingResult, EngineError> {
        let therapist_ids = match request.preferred_therapist_id {
            Some(id) => vec![id],
            None => self.store.therapist_ids().await?,
        };
        let _guards = self.locks.lock_many(therapist_ids).await;

        let result = self.generator.generate(request).await?;
        for session in &result.sessions {
            self.store.upsert_session(session.clone(), None).await?;
            if let Some(window_id) = session.availability_window_id {
                self.availability.record_booking(window_id, session.date).await?;
            }
        }

        if let Some(first) = result.sessions.first() {
            self.notify_detached(ScheduleEvent::ScheduleGenerated {
                therapist_id: first.therapist_id,
                demand_id: request.demand_id,
                sessions_placed: result.sessions.len(),
                unscheduled_sessions: result.unscheduled_sessions,
            });
        }

        info!(
            placed = result.sessions.len(),
            unscheduled = result.unscheduled_sessions,
            "Schedule committed"
        );
        Ok(result)
    }

    /// Improvement pass without persistence.
    pub async fn optimize_schedule(
        &self,
        sessions: Vec<ScheduledSession>,
        config: &OptimizationConfig,
    ) -> Result<OptimizationResult, EngineError> {
        self.optimizer.optimize(sessions, config).await
    }

    /// Optimize and persist relocations under the therapists' locks. Writes
    /// use the optimistic-concurrency stamp captured from the input set, so
    /// a stale snapshot surfaces `ConcurrencyConflict` instead of silently
    /// overwriting newer data.
    #[instrument(skip(self, sessions, config), fields(session_count = sessions.len()))]
    pub async fn optimize_and_commit(
        &self,
        sessions: Vec<ScheduledSession>,
        config: &OptimizationConfig,
    ) -> Result<OptimizationResult, EngineError> {
        let therapist_ids: Vec<Uuid> = sessions.iter().map(|s| s.therapist_id).collect();
        let _guards = self.locks.lock_many(therapist_ids).await;

        let originals: HashMap<Uuid, (Option<Uuid>, chrono::NaiveDate, chrono::DateTime<chrono::Utc>)> =
            sessions
                .iter()
                .map(|s| (s.id, (s.availability_window_id, s.date, s.updated_at)))
                .collect();

        let result = self.optimizer.optimize(sessions, config).await?;

        // A session may be relocated more than once across iterations; only
        // its final placement is written.
        let mut relocated_ids: Vec<Uuid> =
            result.relocations.iter().map(|r| r.session_id).collect();
        relocated_ids.sort();
        relocated_ids.dedup();

        for session_id in relocated_ids {
            let session = match result.sessions.iter().find(|s| s.id == session_id) {
                Some(session) => session,
                None => continue,
            };
            let (old_window, old_date, expected) = originals
                .get(&session.id)
                .copied()
                .unwrap_or((None, session.date, session.updated_at));

            self.store
                .upsert_session(session.clone(), Some(expected))
                .await?;
            let unchanged =
                old_window == session.availability_window_id && old_date == session.date;
            if !unchanged {
                if let Some(window_id) = old_window {
                    self.availability.release_booking(window_id, old_date).await?;
                }
                if let Some(window_id) = session.availability_window_id {
                    self.availability
                        .record_booking(window_id, session.date)
                        .await?;
                }
            }
        }

        if !result.relocations.is_empty() {
            let mut therapist_ids: Vec<Uuid> =
                result.sessions.iter().map(|s| s.therapist_id).collect();
            therapist_ids.sort();
            therapist_ids.dedup();
            self.notify_detached(ScheduleEvent::ScheduleOptimized {
                therapist_ids,
                relocations: result.relocations.len(),
                improvement_percentage: result.improvement_percentage,
            });
        }

        Ok(result)
    }

    /// Pure read: reentrant and lock-free.
    pub async fn check_conflicts(
        &self,
        candidate: &CandidateSlot,
    ) -> Result<Vec<ScheduleConflict>, EngineError> {
        self.conflict_service.check(candidate).await
    }

    #[instrument(skip(self, session_ids, operation), fields(items = session_ids.len()))]
    pub async fn apply_bulk_operation(
        &self,
        session_ids: &[Uuid],
        operation: &BulkOperation,
        batch_size: Option<usize>,
    ) -> Result<BulkOperationResult, EngineError> {
        let mut therapist_ids = Vec::new();
        for session_id in session_ids {
            if let Some(session) = self.store.get_session(*session_id).await? {
                therapist_ids.push(session.therapist_id);
            }
        }
        if let BulkOperation::Reschedule {
            new_therapist_id: Some(id),
            ..
        } = operation
        {
            therapist_ids.push(*id);
        }
        let _guards = self.locks.lock_many(therapist_ids).await;

        let result = self.bulk.apply(session_ids, operation, batch_size).await?;

        if !result.successful_session_ids.is_empty() {
            let event = match operation {
                BulkOperation::Reschedule { .. } => ScheduleEvent::SessionsRescheduled {
                    session_ids: result.successful_session_ids.clone(),
                },
                BulkOperation::Cancel { .. } => ScheduleEvent::SessionsCancelled {
                    session_ids: result.successful_session_ids.clone(),
                },
                BulkOperation::Modify { .. } => ScheduleEvent::SessionsModified {
                    session_ids: result.successful_session_ids.clone(),
                },
            };
            self.notify_detached(event);
        }

        Ok(result)
    }

    pub async fn rollback_bulk_operation(
        &self,
        result: &BulkOperationResult,
    ) -> Result<usize, EngineError> {
        let mut therapist_ids: Vec<Uuid> =
            result.snapshots.iter().map(|s| s.therapist_id).collect();
        therapist_ids.sort();
        therapist_ids.dedup();
        let _guards = self.locks.lock_many(therapist_ids).await;
        self.bulk.rollback(result).await
    }

    /// Template instantiation mutates the therapist's calendar, so it runs
    /// under the same critical section as generation.
    pub async fn apply_template(
        &self,
        template_id: Uuid,
        therapist_id: Uuid,
        start_date: chrono::NaiveDate,
    ) -> Result<TemplateApplication, EngineError> {
        let _guard = self.locks.lock_one(therapist_id).await;
        self.templates.apply(template_id, therapist_id, start_date).await
    }

    /// Pure reduction over caller-supplied data.
    pub fn compute_metrics(
        &self,
        sessions: &[ScheduledSession],
        windows: &[AvailabilityWindow],
        exceptions: &[AvailabilityException],
        period: DateRange,
    ) -> MetricsReport {
        self.metrics.compute(sessions, windows, exceptions, period)
    }

    /// Convenience: fetch the period's sessions and availability from the
    /// store, then reduce.
    pub async fn compute_metrics_for_period(
        &self,
        period: DateRange,
    ) -> Result<MetricsReport, EngineError> {
        let sessions = self
            .store
            .sessions_matching(SessionFilter {
                from_date: Some(period.start),
                to_date: Some(period.end),
                ..SessionFilter::default()
            })
            .await?;

        let mut windows = Vec::new();
        let mut exceptions = Vec::new();
        for therapist_id in self.store.therapist_ids().await? {
            windows.extend(self.store.windows_for_therapist(therapist_id).await?);
            exceptions.extend(self.store.exceptions_for_therapist(therapist_id).await?);
        }

        Ok(self.metrics.compute(&sessions, &windows, &exceptions, period))
    }

    fn notify_detached(&self, event: ScheduleEvent) {
        let notifier = Arc::clone(&self.notifier);
        debug!(?event, "dispatching schedule event");
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(event).await {
                warn!("Notifier failed: {}", e);
            }
        });
    }
}
