//! Stage identifiers and definitions.

use serde::{Deserialize, Serialize};

use super::case::Ancillary;
use super::status::Status;

/// Identifier of an operational unit. Defined by the stage registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub const TRIAGE: &'static str = "triage";
    pub const CONSULTATION: &'static str = "general-consultation";
    pub const LABORATORY: &'static str = "laboratory";
    pub const RADIOLOGY: &'static str = "radiology";
    pub const PHARMACY: &'static str = "pharmacy";
    pub const CHECKOUT: &'static str = "checkout";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Static description of one stage. Every stage-specific rule in the engine
/// is read from here rather than hard-coded per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,

    /// Human label, e.g. "General Consultation".
    pub label: String,

    /// Display order. Lower comes first.
    pub position: u32,

    /// Statuses from which `start_stage` may enter this stage.
    pub entry_statuses: Vec<Status>,

    /// The `in-<stage>` status.
    pub active_status: Status,

    /// Status written by `complete_stage`.
    pub completion_status: Status,

    /// Status set when a case is routed into this stage.
    #[serde(default)]
    pub arrival_status: Option<Status>,

    /// Completion statuses a case may be moved in from. Empty means the
    /// stage is never the target of a move.
    #[serde(default)]
    pub from_statuses: Vec<Status>,

    /// Status used while the case waits for payment before entry.
    #[serde(default)]
    pub payment_hold_status: Option<Status>,

    /// Statuses that admit a not-yet-routed case into this stage's queues
    /// regardless of its current stage. Only the intake stage sets these.
    #[serde(default)]
    pub pre_entry_statuses: Vec<Status>,

    /// Diagnostic stages support pause/resume around external results.
    #[serde(default)]
    pub diagnostic: bool,

    /// Entry requires the payment collaborator to confirm clearance.
    #[serde(default)]
    pub payment_gated: bool,

    /// Urgent and critical cases may skip the payment gate here.
    #[serde(default)]
    pub emergency_bypass: bool,

    /// The journey may end after this stage completes.
    #[serde(default)]
    pub terminal_capable: bool,

    /// Pending-ancillary flag cleared when this stage completes.
    #[serde(default)]
    pub clears_pending: Option<Ancillary>,
}

impl StageDefinition {
    pub fn admits(&self, status: Status) -> bool {
        self.entry_statuses.contains(&status)
    }

    /// May a case that has just reached `status` be moved here?
    pub fn accepts_from(&self, status: Status) -> bool {
        self.from_statuses.contains(&status)
    }

    pub fn is_active(&self, status: Status) -> bool {
        self.active_status == status
    }

    pub fn is_pre_entry(&self, status: Status) -> bool {
        self.pre_entry_statuses.contains(&status)
    }

    /// Status a paused case falls back to: the arrival status, or failing
    /// that the first legal entry status.
    pub fn pause_status(&self) -> Option<Status> {
        self.arrival_status
            .or_else(|| self.entry_statuses.first().copied())
    }
}
