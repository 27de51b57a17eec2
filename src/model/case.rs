//! The case record and its parts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::StageId;
use super::status::Status;
use super::vitals::{Measurements, Priority};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Newtype for case IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CaseId(pub Uuid);

impl CaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for CaseId {
    fn default() -> Self {
        Self::new()
    }
}

/// Opaque worker identity. Provisioned elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A worker and the stage they operate in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub stage: StageId,
}

impl Worker {
    pub fn new(id: impl Into<String>, stage: impl Into<StageId>) -> Self {
        Self {
            id: WorkerId(id.into()),
            stage: stage.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Arrival, entry and completion times for one visit of one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimestamps {
    /// Routed into the stage's queue.
    pub arrived_at: Option<DateTime<Utc>>,
    /// First `start_stage` of this visit. Never reset by pause/resume.
    pub entered_at: Option<DateTime<Utc>>,
    /// Written once by `complete_stage`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageTimestamps {
    pub fn is_entered(&self) -> bool {
        self.entered_at.is_some()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.arrived_at.is_none() && self.entered_at.is_none() && self.completed_at.is_none()
    }

    /// Entered but not finished.
    pub fn is_open(&self) -> bool {
        self.is_entered() && !self.is_completed()
    }
}

/// An archived visit, kept when a stage is entered a second time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageVisit {
    pub stage: StageId,
    pub timestamps: StageTimestamps,
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Exclusive claim of a case by one worker within one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker: WorkerId,
    /// The stage the case was in when assigned.
    pub stage: StageId,
    pub assigned_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Ancillary flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ancillary {
    Lab,
    Radiology,
    Pharmacy,
}

impl std::fmt::Display for Ancillary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Ancillary::Lab => "lab",
            Ancillary::Radiology => "radiology",
            Ancillary::Pharmacy => "pharmacy",
        };
        write!(f, "{s}")
    }
}

/// Work outstanding in companion subsystems. Toggled by those subsystems;
/// the engine only clears a flag when the matching stage completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncillaryFlags {
    pub pending_lab: bool,
    pub pending_radiology: bool,
    pub pending_pharmacy: bool,
}

impl AncillaryFlags {
    pub fn get(&self, kind: Ancillary) -> bool {
        match kind {
            Ancillary::Lab => self.pending_lab,
            Ancillary::Radiology => self.pending_radiology,
            Ancillary::Pharmacy => self.pending_pharmacy,
        }
    }

    pub fn set(&mut self, kind: Ancillary, pending: bool) {
        match kind {
            Ancillary::Lab => self.pending_lab = pending,
            Ancillary::Radiology => self.pending_radiology = pending,
            Ancillary::Pharmacy => self.pending_pharmacy = pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Case
// ---------------------------------------------------------------------------

/// A case tracked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,

    /// Display name of the person.
    pub name: String,

    /// External identifier (record number). Searchable.
    pub identifier: String,

    pub status: Status,

    /// `None` until the case is routed into its first stage.
    pub current_stage: Option<StageId>,

    /// Where a diagnostic detour hands the case back to.
    pub return_stage: Option<StageId>,

    /// Stages already left, in no particular order, without duplicates.
    pub previous_stages: Vec<StageId>,

    pub priority: Priority,

    pub assignment: Option<Assignment>,

    /// Current visit timestamps per stage.
    pub timeline: BTreeMap<StageId, StageTimestamps>,

    /// Earlier visits of stages the case has re-entered.
    pub history: Vec<StageVisit>,

    pub pending: AncillaryFlags,

    /// Most recently recorded measurements.
    pub measurements: Option<Measurements>,

    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub discharged_at: Option<DateTime<Utc>>,
}

impl Case {
    pub fn assigned_worker(&self) -> Option<&WorkerId> {
        self.assignment.as_ref().map(|a| &a.worker)
    }

    pub fn timestamps(&self, stage: &StageId) -> StageTimestamps {
        self.timeline.get(stage).copied().unwrap_or_default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_in_stage(&self, stage: &StageId) -> bool {
        self.current_stage.as_ref() == Some(stage)
    }

    /// Completed `stage` in the current visit or an archived one.
    pub fn has_completed(&self, stage: &StageId) -> bool {
        self.timestamps(stage).is_completed()
            || self
                .history
                .iter()
                .any(|v| &v.stage == stage && v.timestamps.is_completed())
    }

    /// Case-insensitive substring match on name and identifier.
    pub fn matches_text(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.name.to_lowercase().contains(&query)
            || self.identifier.to_lowercase().contains(&query)
            || self.id.0.to_string().starts_with(&query)
    }

    /// Timestamp waiting in `stage` is measured from: entry, else arrival,
    /// else registration.
    pub fn wait_anchor(&self, stage: &StageId) -> DateTime<Utc> {
        let ts = self.timestamps(stage);
        ts.entered_at
            .or(ts.arrived_at)
            .unwrap_or(self.registered_at)
    }

    // -----------------------------------------------------------------------
    // Timeline mutation (engine only)
    // -----------------------------------------------------------------------

    /// Record arrival in `stage`, archiving any earlier visit first.
    pub(crate) fn mark_arrived(&mut self, stage: &StageId, now: DateTime<Utc>) {
        if let Some(previous) = self.timeline.remove(stage) {
            if !previous.is_empty() {
                self.history.push(StageVisit {
                    stage: stage.clone(),
                    timestamps: previous,
                });
            }
        }
        self.timeline.insert(
            stage.clone(),
            StageTimestamps {
                arrived_at: Some(now),
                ..StageTimestamps::default()
            },
        );
    }

    /// Set `entered_at` unless already set. Returns true on first entry.
    pub(crate) fn mark_entered(&mut self, stage: &StageId, now: DateTime<Utc>) -> bool {
        let ts = self.timeline.entry(stage.clone()).or_default();
        if ts.entered_at.is_some() {
            return false;
        }
        ts.entered_at = Some(now);
        true
    }

    pub(crate) fn mark_completed(&mut self, stage: &StageId, now: DateTime<Utc>) -> Result<()> {
        let id = self.id;
        let ts = self.timeline.entry(stage.clone()).or_default();
        let Some(entered) = ts.entered_at else {
            return Err(Error::InvariantViolation {
                case: id,
                detail: format!("completing {stage} before it was entered"),
            });
        };
        if ts.completed_at.is_some() {
            return Err(Error::InvariantViolation {
                case: id,
                detail: format!("{stage} already completed"),
            });
        }
        if now < entered {
            return Err(Error::InvariantViolation {
                case: id,
                detail: format!("{stage} completion at {now} precedes entry at {entered}"),
            });
        }
        ts.completed_at = Some(now);
        Ok(())
    }

    pub(crate) fn push_previous(&mut self, stage: StageId) {
        if !self.previous_stages.contains(&stage) {
            self.previous_stages.push(stage);
        }
    }

    /// Registry-independent invariants.
    pub fn check_invariants(&self) -> Result<()> {
        let violation = |detail: String| Error::InvariantViolation {
            case: self.id,
            detail,
        };

        let visits = self
            .timeline
            .iter()
            .chain(self.history.iter().map(|v| (&v.stage, &v.timestamps)));
        for (stage, ts) in visits {
            if let Some(completed) = ts.completed_at {
                match ts.entered_at {
                    None => return Err(violation(format!("{stage} completed without entry"))),
                    Some(entered) if completed < entered => {
                        return Err(violation(format!("{stage} completed before entry")));
                    }
                    Some(_) => {}
                }
            }
        }

        if self.is_terminal() != self.discharged_at.is_some() {
            return Err(violation(format!(
                "status {} disagrees with discharge time",
                self.status
            )));
        }

        if let Some(ref current) = self.current_stage {
            if self.timestamps(current).is_empty() {
                return Err(violation(format!("{current} is current without arrival")));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for registering a new case. The engine's public API for intake.
#[derive(Debug, Clone)]
pub struct NewCase {
    pub(crate) name: String,
    pub(crate) identifier: String,
    pub(crate) priority: Priority,
    pub(crate) measurements: Option<Measurements>,
}

impl NewCase {
    pub fn new(name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier: identifier.into(),
            priority: Priority::Normal,
            measurements: None,
        }
    }

    /// Priority chosen at the desk. Measurements can only raise it.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }
}
