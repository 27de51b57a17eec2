//! Workflow engine. The public API for moving cases through stages.
//!
//! The engine owns the case store and the notification log. Every status
//! change and every assignment goes through here; callers never mutate case
//! fields directly. Each mutating operation follows the same path:
//!
//! 1. take the per-case lock and copy the record,
//! 2. validate against the stage registry,
//! 3. consult collaborators that gate the change (payment),
//! 4. apply, check invariants, commit,
//! 5. append notifications,
//! 6. queue the repository patch and release the lock.
//!
//! A failure in steps 1-4 leaves the case untouched. Repository writes and
//! the external notification sink run behind the operation, in
//! [`Engine::flush`]; a slow or failing repository never delays a caller.

mod assignment;
mod control;
mod transition;
mod writeback;

pub use control::{FlushReport, TickReport};
pub use transition::{PriorityAssessment, StageOutcome};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, Span};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{Case, CaseId, NotificationKind, Severity, StageId, Status, WorkerId};
use crate::notify::NotificationDispatcher;
use crate::queue::{QueueFilter, QueueResolver, QueueView};
use crate::registry::StageRegistry;
use crate::repository::{AncillaryRecords, CasePatch, CaseRepository};
use crate::store::{CaseGuard, CaseStore};
use crate::telemetry::case::{record_transition, start_case_span};
use crate::telemetry::metrics;
use crate::wait::{WaitTime, WaitTimeTracker};
use writeback::WriteQueue;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the background loop recomputes wait times, retries failed
    /// deliveries and refreshes from the repository.
    pub wait_refresh: Duration,
    /// Upper bound on any single collaborator call.
    pub collaborator_timeout: Duration,
    /// Delivery attempts per notification and target before giving up.
    pub delivery_max_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wait_refresh: Duration::from_secs(60),
            collaborator_timeout: Duration::from_millis(2000),
            delivery_max_attempts: 5,
        }
    }
}

/// A notification to emit once a change commits.
#[derive(Debug)]
pub(crate) struct Notice {
    stage: Option<StageId>,
    kind: NotificationKind,
}

impl Notice {
    pub(crate) fn to(stage: &StageId, kind: NotificationKind) -> Self {
        Self {
            stage: Some(stage.clone()),
            kind,
        }
    }

    pub(crate) fn broadcast(stage: Option<StageId>, kind: NotificationKind) -> Self {
        Self { stage, kind }
    }
}

/// The workflow engine. Owns all case state and enforces all invariants.
pub struct Engine {
    registry: Arc<StageRegistry>,
    store: CaseStore,
    repository: Arc<dyn CaseRepository>,
    notifier: NotificationDispatcher,
    resolver: QueueResolver,
    waits: WaitTimeTracker,
    writes: WriteQueue,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    shutdown: Arc<Notify>,
}

impl Engine {
    pub fn new(
        registry: StageRegistry,
        repository: Arc<dyn CaseRepository>,
        config: EngineConfig,
    ) -> Self {
        Self::with_clock(registry, repository, config, Arc::new(SystemClock))
    }

    /// Build an engine on an explicit time source.
    pub fn with_clock(
        registry: StageRegistry,
        repository: Arc<dyn CaseRepository>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = Arc::new(registry);
        Self {
            store: CaseStore::new(),
            notifier: NotificationDispatcher::new(config.delivery_max_attempts),
            resolver: QueueResolver::new(Arc::clone(&registry)),
            waits: WaitTimeTracker::new(Arc::clone(&registry), Arc::clone(&clock)),
            writes: WriteQueue::new(),
            registry,
            repository,
            clock,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The notification log and its listeners.
    pub fn notifications(&self) -> &NotificationDispatcher {
        &self.notifier
    }

    pub fn get(&self, id: CaseId) -> Result<Case> {
        self.store.get(id)
    }

    /// Snapshot of every case, discharged ones included.
    pub fn cases(&self) -> Vec<Case> {
        self.store.snapshot()
    }

    /// The four queue partitions of `stage` as seen by `worker`.
    pub fn queues(
        &self,
        stage: &StageId,
        worker: &WorkerId,
        filter: &QueueFilter,
    ) -> Result<QueueView> {
        self.resolver
            .resolve(&self.store.snapshot(), stage, worker, filter)
    }

    /// On-demand wait time in the stage the case is waiting in. `None` for
    /// discharged cases.
    pub fn wait_time(&self, id: CaseId) -> Result<Option<WaitTime>> {
        let case = self.store.get(id)?;
        if case.is_terminal() {
            return Ok(None);
        }
        Ok(self
            .registry
            .effective_stage(&case)
            .map(|stage| self.waits.compute(&case, &stage)))
    }

    /// Recompute every active case's wait time now.
    pub fn recompute_wait_times(&self) -> Vec<WaitTime> {
        self.waits.recompute(&self.store.snapshot())
    }

    /// Wait time from the most recent recomputation. `None` until the case
    /// has been through one, or once it has left the active set.
    pub fn last_wait_time(&self, id: CaseId) -> Option<WaitTime> {
        self.waits.latest(id)
    }

    /// Wait times from the most recent recomputation for one stage.
    pub fn stage_wait_times(&self, stage: &StageId) -> Vec<WaitTime> {
        self.waits.for_stage(stage)
    }

    /// Patches committed but not yet written to the repository.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    /// Pass-through to the repository's ancillary records.
    pub async fn ancillary_records(&self, id: CaseId) -> Result<AncillaryRecords> {
        if !self.store.contains(id) {
            return Err(Error::CaseNotFound(id));
        }
        self.call(
            "fetch_ancillary_records",
            self.repository.fetch_ancillary_records(id),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Shared write path
    // -----------------------------------------------------------------------

    /// Run one operation inside its span and count failures.
    async fn observe<T>(
        &self,
        operation: &'static str,
        case_id: CaseId,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let result = fut.instrument(start_case_span(operation, case_id)).await;
        if let Err(ref e) = result {
            metrics::rejected_operations().add(
                1,
                &[
                    KeyValue::new("operation", operation),
                    KeyValue::new("error", e.kind()),
                ],
            );
            if e.is_business_rule() {
                tracing::debug!(operation, case = %case_id, error = %e, "operation rejected");
            } else {
                tracing::warn!(operation, case = %case_id, error = %e, "operation failed");
            }
        }
        result
    }

    /// Lock a case and copy it out of the store.
    async fn checkout(&self, id: CaseId) -> Result<(CaseGuard, Case)> {
        let guard = self.store.lock(id).await;
        let case = self.store.get(id)?;
        Ok((guard, case))
    }

    /// Steps 4-6 of the write path.
    async fn commit(
        &self,
        guard: CaseGuard,
        operation: &'static str,
        before: Status,
        case: Case,
        notices: Vec<Notice>,
    ) -> Result<Case> {
        case.check_invariants()?;
        self.store.commit(&guard, case.clone());

        if before != case.status {
            record_transition(&Span::current(), before, case.status);
            metrics::case_transitions().add(
                1,
                &[
                    KeyValue::new("operation", operation),
                    KeyValue::new("from", before.as_str()),
                    KeyValue::new("to", case.status.as_str()),
                ],
            );
        }
        tracing::info!(case = %case.id, status = %case.status, operation, "committed");

        let severity = Severity::from(case.priority);
        for notice in notices {
            self.notifier
                .emit(case.updated_at, case.id, notice.stage, severity, notice.kind);
        }

        self.writes.push(case.id, CasePatch::from(&case));
        drop(guard);
        Ok(case)
    }

    /// Bounded collaborator call. Any failure surfaces as a collaborator
    /// error; the caller decides what that means for the operation.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.config.collaborator_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e @ (Error::CollaboratorError { .. } | Error::CollaboratorTimeout { .. }))) => {
                Err(e)
            }
            Ok(Err(other)) => Err(Error::CollaboratorError {
                operation,
                message: other.to_string(),
            }),
            Err(_) => Err(Error::CollaboratorTimeout { operation }),
        };

        let outcome = match result {
            Ok(_) => "ok",
            Err(Error::CollaboratorTimeout { .. }) => "timeout",
            Err(_) => "error",
        };
        metrics::collaborator_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("result", outcome),
            ],
        );
        if let Err(ref e) = result {
            tracing::warn!(operation, error = %e, "collaborator call failed");
        }
        result
    }

    /// Stage addressed by notifications about `case` that are not tied to a
    /// specific stage transition.
    fn home_stage(&self, case: &Case) -> Option<StageId> {
        self.registry.effective_stage(case)
    }
}
