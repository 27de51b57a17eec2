//! Structured notifications emitted on every transition, assignment and
//! release.
//!
//! Other stages subscribe to learn about inbound cases; dashboards use them
//! for live updates. A notification is never changed after creation except
//! for its `read` flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::case::{Ancillary, CaseId, WorkerId};
use super::stage::StageId;
use super::vitals::Priority;

/// Consumers de-duplicate on this; delivery is at-least-once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl From<Priority> for Severity {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Normal => Severity::Info,
            Priority::Urgent => Severity::Warning,
            Priority::Critical => Severity::Critical,
        }
    }
}

/// A notification in the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub case_id: CaseId,
    /// Stage the notification is addressed to, if any.
    pub stage: Option<StageId>,
    pub severity: Severity,
    pub read: bool,
    pub kind: NotificationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    CaseRegistered {
        priority: Priority,
    },
    StageStarted {
        stage: StageId,
        resumed: bool,
    },
    StageCompleted {
        stage: StageId,
    },
    /// Addressed to `to`: the downstream stage learns a case is inbound.
    CaseMoved {
        from: Option<StageId>,
        to: StageId,
    },
    CasePaused {
        stage: StageId,
    },
    PaymentHold {
        stage: StageId,
    },
    CaseDischarged,
    CaseAssigned {
        worker: WorkerId,
        stage: StageId,
    },
    CaseReleased {
        worker: WorkerId,
        stage: StageId,
    },
    PriorityEscalated {
        from: Priority,
        to: Priority,
    },
    PriorityOverridden {
        from: Priority,
        to: Priority,
        by: WorkerId,
    },
    PendingChanged {
        ancillary: Ancillary,
        pending: bool,
    },
}

impl NotificationKind {
    pub fn name(&self) -> &'static str {
        match self {
            NotificationKind::CaseRegistered { .. } => "case_registered",
            NotificationKind::StageStarted { .. } => "stage_started",
            NotificationKind::StageCompleted { .. } => "stage_completed",
            NotificationKind::CaseMoved { .. } => "case_moved",
            NotificationKind::CasePaused { .. } => "case_paused",
            NotificationKind::PaymentHold { .. } => "payment_hold",
            NotificationKind::CaseDischarged => "case_discharged",
            NotificationKind::CaseAssigned { .. } => "case_assigned",
            NotificationKind::CaseReleased { .. } => "case_released",
            NotificationKind::PriorityEscalated { .. } => "priority_escalated",
            NotificationKind::PriorityOverridden { .. } => "priority_overridden",
            NotificationKind::PendingChanged { .. } => "pending_changed",
        }
    }
}
