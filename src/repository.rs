//! Collaborator boundary.
//!
//! The engine reads cases from, writes patches to, asks payment questions of
//! and forwards notifications to a [`CaseRepository`]. It never implements
//! those concerns itself. Every call is wrapped by the engine in a timeout;
//! implementations only report success or failure.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    AncillaryFlags, Assignment, Case, CaseId, Measurements, Notification, Priority, StageId,
    StageTimestamps, StageVisit, Status,
};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Workflow fields written through after a local mutation. Identity fields
/// (name, identifier, registration time) are owned by the intake service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CasePatch {
    pub status: Status,
    pub current_stage: Option<StageId>,
    pub return_stage: Option<StageId>,
    pub previous_stages: Vec<StageId>,
    pub priority: Priority,
    pub assignment: Option<Assignment>,
    pub timeline: BTreeMap<StageId, StageTimestamps>,
    pub history: Vec<StageVisit>,
    pub pending: AncillaryFlags,
    pub measurements: Option<Measurements>,
    pub updated_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
}

impl From<&Case> for CasePatch {
    fn from(case: &Case) -> Self {
        Self {
            status: case.status,
            current_stage: case.current_stage.clone(),
            return_stage: case.return_stage.clone(),
            previous_stages: case.previous_stages.clone(),
            priority: case.priority,
            assignment: case.assignment.clone(),
            timeline: case.timeline.clone(),
            history: case.history.clone(),
            pending: case.pending,
            measurements: case.measurements,
            updated_at: case.updated_at,
            discharged_at: case.discharged_at,
        }
    }
}

/// One order in a companion subsystem (a lab test, an imaging study, a
/// prescription).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AncillaryRecord {
    pub id: String,
    pub description: String,
    /// Free-form status owned by the companion subsystem.
    pub status: String,
    pub ordered_at: DateTime<Utc>,
}

/// Everything companion subsystems hold for one case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AncillaryRecords {
    #[serde(default)]
    pub tests: Vec<AncillaryRecord>,
    #[serde(default)]
    pub imaging: Vec<AncillaryRecord>,
    #[serde(default)]
    pub prescriptions: Vec<AncillaryRecord>,
}

impl AncillaryRecords {
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty() && self.imaging.is_empty() && self.prescriptions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CaseRepository: Send + Sync {
    /// Read-through of every known case, at startup and on refresh.
    async fn fetch_cases(&self) -> Result<Vec<Case>>;

    async fn fetch_ancillary_records(&self, case_id: CaseId) -> Result<AncillaryRecords>;

    /// Best-effort write-through. Local state stays authoritative when this
    /// fails.
    async fn persist(&self, case_id: CaseId, patch: CasePatch) -> Result<()>;

    /// Fails closed: anything but `Ok(true)` blocks a payment-gated entry.
    async fn check_payment_cleared(&self, case_id: CaseId, stage: &StageId) -> Result<bool>;

    /// Sink for the notification fan-out (e.g. a cross-stage inbox).
    async fn notify_external(&self, notification: &Notification) -> Result<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// Collaborator operations, for scripting failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchCases,
    FetchAncillaryRecords,
    Persist,
    CheckPaymentCleared,
    NotifyExternal,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::FetchCases => "fetch_cases",
            Operation::FetchAncillaryRecords => "fetch_ancillary_records",
            Operation::Persist => "persist",
            Operation::CheckPaymentCleared => "check_payment_cleared",
            Operation::NotifyExternal => "notify_external",
        }
    }
}

#[derive(Debug, Clone)]
enum Script {
    /// Fail the next `remaining` calls.
    Fail { message: String, remaining: u32 },
    /// Sleep before answering, until cleared.
    Delay(Duration),
}

#[derive(Debug, Default)]
struct State {
    cases: Vec<Case>,
    ancillary: HashMap<CaseId, AncillaryRecords>,
    cleared: HashSet<(CaseId, StageId)>,
    patches: Vec<(CaseId, CasePatch)>,
    external: Vec<Notification>,
    scripts: HashMap<Operation, Script>,
}

/// A repository held entirely in memory.
///
/// Serves the operator binary and the test suite. Payment clearance, failures
/// and latency are all scriptable; every write is captured for inspection.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the records `fetch_cases` returns.
    pub fn with_cases(cases: Vec<Case>) -> Self {
        let repo = Self::new();
        repo.state.lock().cases = cases;
        repo
    }

    pub fn set_ancillary_records(&self, case_id: CaseId, records: AncillaryRecords) {
        self.state.lock().ancillary.insert(case_id, records);
    }

    pub fn clear_payment(&self, case_id: CaseId, stage: impl Into<StageId>) {
        self.state.lock().cleared.insert((case_id, stage.into()));
    }

    pub fn revoke_payment(&self, case_id: CaseId, stage: impl Into<StageId>) {
        self.state.lock().cleared.remove(&(case_id, stage.into()));
    }

    /// Make the next `times` calls of `operation` fail.
    pub fn fail_next(&self, operation: Operation, times: u32, message: impl Into<String>) {
        self.state.lock().scripts.insert(
            operation,
            Script::Fail {
                message: message.into(),
                remaining: times,
            },
        );
    }

    /// Delay every call of `operation` by `by` until [`Self::reset`].
    pub fn delay(&self, operation: Operation, by: Duration) {
        self.state.lock().scripts.insert(operation, Script::Delay(by));
    }

    /// Drop all scripted failures and delays.
    pub fn reset(&self) {
        self.state.lock().scripts.clear();
    }

    /// Every patch persisted so far, oldest first.
    pub fn patches(&self) -> Vec<(CaseId, CasePatch)> {
        self.state.lock().patches.clone()
    }

    pub fn last_patch(&self, case_id: CaseId) -> Option<CasePatch> {
        self.state
            .lock()
            .patches
            .iter()
            .rev()
            .find(|(id, _)| *id == case_id)
            .map(|(_, p)| p.clone())
    }

    /// Notifications received by the external sink, in arrival order.
    pub fn external_notifications(&self) -> Vec<Notification> {
        self.state.lock().external.clone()
    }

    /// Apply the script for `operation`, if any.
    async fn scripted(&self, operation: Operation) -> Result<()> {
        let script = self.state.lock().scripts.get(&operation).cloned();
        match script {
            None => Ok(()),
            Some(Script::Delay(by)) => {
                tokio::time::sleep(by).await;
                Ok(())
            }
            Some(Script::Fail { message, remaining }) => {
                let mut state = self.state.lock();
                if remaining <= 1 {
                    state.scripts.remove(&operation);
                } else {
                    state.scripts.insert(
                        operation,
                        Script::Fail {
                            message: message.clone(),
                            remaining: remaining - 1,
                        },
                    );
                }
                Err(Error::CollaboratorError {
                    operation: operation.as_str(),
                    message,
                })
            }
        }
    }
}

#[async_trait]
impl CaseRepository for InMemoryRepository {
    async fn fetch_cases(&self) -> Result<Vec<Case>> {
        self.scripted(Operation::FetchCases).await?;
        Ok(self.state.lock().cases.clone())
    }

    async fn fetch_ancillary_records(&self, case_id: CaseId) -> Result<AncillaryRecords> {
        self.scripted(Operation::FetchAncillaryRecords).await?;
        Ok(self
            .state
            .lock()
            .ancillary
            .get(&case_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn persist(&self, case_id: CaseId, patch: CasePatch) -> Result<()> {
        self.scripted(Operation::Persist).await?;
        self.state.lock().patches.push((case_id, patch));
        Ok(())
    }

    async fn check_payment_cleared(&self, case_id: CaseId, stage: &StageId) -> Result<bool> {
        self.scripted(Operation::CheckPaymentCleared).await?;
        Ok(self.state.lock().cleared.contains(&(case_id, stage.clone())))
    }

    async fn notify_external(&self, notification: &Notification) -> Result<()> {
        self.scripted(Operation::NotifyExternal).await?;
        self.state.lock().external.push(notification.clone());
        Ok(())
    }
}
