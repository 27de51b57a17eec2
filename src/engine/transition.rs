//! Status transitions and stage moves.

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};

use super::{Engine, Notice};
use crate::error::{Error, Result};
use crate::model::{
    Ancillary, Case, CaseId, Measurements, NewCase, NotificationKind, Priority, StageDefinition,
    StageId, Status, WorkerId,
};
use crate::priority;
use crate::queue::is_paused;
use crate::telemetry::metrics;

/// What the worker recorded when finishing a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Measurements taken during the stage. Can only raise the priority.
    pub measurements: Option<Measurements>,
    /// Priority assessed by the worker. An explicit operator choice, so it
    /// may lower the level; audit-logged like an override.
    pub priority: Option<Priority>,
    /// Who assessed it. Defaults to the assigned worker.
    pub assessed_by: Option<WorkerId>,
}

impl StageOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn measurements(mut self, measurements: Measurements) -> Self {
        self.measurements = Some(measurements);
        self
    }

    pub fn assessed_by(mut self, worker: impl Into<WorkerId>) -> Self {
        self.assessed_by = Some(worker.into());
        self
    }
}

/// Result of recording measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityAssessment {
    pub previous: Priority,
    /// What the calculator suggests for these measurements alone.
    pub suggested: Priority,
    /// Level stored on the case afterwards.
    pub adopted: Priority,
}

impl PriorityAssessment {
    pub fn escalated(&self) -> bool {
        self.adopted > self.previous
    }
}

fn invalid(case: &Case, action: impl Into<String>) -> Error {
    Error::InvalidTransition {
        case: case.id,
        status: case.status,
        action: action.into(),
    }
}

impl Engine {
    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Register a new case. It starts unrouted, waiting in the intake queue.
    pub async fn register(&self, new: NewCase) -> Result<Case> {
        let id = CaseId::new();
        self.observe("register", id, async {
            let now = self.clock.now();
            let suggested = new
                .measurements
                .as_ref()
                .map(priority::compute)
                .unwrap_or_default();
            let level = priority::escalate(new.priority, suggested);

            let case = Case {
                id,
                name: new.name,
                identifier: new.identifier,
                status: Status::Registered,
                current_stage: None,
                return_stage: None,
                previous_stages: Vec::new(),
                priority: level,
                assignment: None,
                timeline: Default::default(),
                history: Vec::new(),
                pending: Default::default(),
                measurements: new.measurements,
                registered_at: now,
                updated_at: now,
                discharged_at: None,
            };
            self.store.insert(case.clone())?;
            let guard = self.store.lock(id).await;

            let intake = self.registry.intake_stage().map(|s| s.id.clone());
            let notices = vec![Notice::broadcast(
                intake,
                NotificationKind::CaseRegistered { priority: level },
            )];
            self.commit(guard, "register", Status::Registered, case, notices)
                .await
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Stage lifecycle
    // -----------------------------------------------------------------------

    /// Enter `stage`. Legal only from one of the stage's entry statuses,
    /// and only for the stage the case is in (or, for an unrouted case, any
    /// stage that admits its status). Entry time is set once per visit.
    pub async fn start_stage(&self, id: CaseId, stage: &StageId) -> Result<Case> {
        self.observe("start_stage", id, self.enter(id, stage, false))
            .await
    }

    /// Resume a paused stage. Entry time is left alone.
    pub async fn resume(&self, id: CaseId) -> Result<Case> {
        self.observe("resume", id, async {
            let case = self.store.get(id)?;
            let stage = case
                .current_stage
                .clone()
                .ok_or_else(|| invalid(&case, "resume"))?;
            self.enter(id, &stage, true).await
        })
        .await
    }

    async fn enter(&self, id: CaseId, stage: &StageId, resuming: bool) -> Result<Case> {
        let def = self.registry.require(stage)?;
        let (guard, mut case) = self.checkout(id).await?;
        let action = format!("start {stage}");

        if case.is_terminal() {
            return Err(invalid(&case, action));
        }
        if let Some(ref current) = case.current_stage {
            if current != stage {
                return Err(invalid(&case, action));
            }
        }
        if resuming && !is_paused(&case, def) {
            return Err(invalid(&case, format!("resume {stage}")));
        }
        if !def.admits(case.status) {
            return Err(invalid(&case, action));
        }
        if def.payment_gated {
            self.payment_gate(&case, def).await?;
        }

        let now = self.clock.now();
        let before = case.status;
        if case.current_stage.is_none() {
            case.current_stage = Some(stage.clone());
            case.mark_arrived(stage, now);
        }
        let first_entry = case.mark_entered(stage, now);
        case.status = def.active_status;
        case.updated_at = now;

        let notices = vec![Notice::to(
            stage,
            NotificationKind::StageStarted {
                stage: stage.clone(),
                resumed: !first_entry,
            },
        )];
        self.commit(guard, "start_stage", before, case, notices)
            .await
    }

    /// Fail closed unless the payment collaborator confirms clearance, or
    /// the stage lets emergencies through.
    async fn payment_gate(&self, case: &Case, def: &StageDefinition) -> Result<()> {
        if def.emergency_bypass && case.priority.is_emergency() {
            tracing::info!(
                case = %case.id,
                stage = %def.id,
                priority = %case.priority,
                "payment gate bypassed for emergency"
            );
            return Ok(());
        }
        let cleared = self
            .call(
                "check_payment_cleared",
                self.repository.check_payment_cleared(case.id, &def.id),
            )
            .await?;
        if cleared {
            Ok(())
        } else {
            Err(Error::PaymentRequired {
                case: case.id,
                stage: def.id.clone(),
            })
        }
    }

    /// Finish `stage`. The only place a completion time is written.
    pub async fn complete_stage(
        &self,
        id: CaseId,
        stage: &StageId,
        outcome: StageOutcome,
    ) -> Result<Case> {
        self.observe("complete_stage", id, async {
            let def = self.registry.require(stage)?;
            let (guard, mut case) = self.checkout(id).await?;

            if !case.is_in_stage(stage) || !def.is_active(case.status) {
                return Err(invalid(&case, format!("complete {stage}")));
            }

            let now = self.clock.now();
            let before = case.status;
            case.mark_completed(stage, now)?;
            case.status = def.completion_status;
            case.updated_at = now;
            if let Some(ancillary) = def.clears_pending {
                case.pending.set(ancillary, false);
            }

            let mut notices = vec![Notice::to(
                stage,
                NotificationKind::StageCompleted {
                    stage: stage.clone(),
                },
            )];

            if let Some(m) = outcome.measurements {
                notices.extend(self.apply_measurements(&mut case, m).1);
            }
            if let Some(level) = outcome.priority {
                let by = outcome
                    .assessed_by
                    .or_else(|| case.assigned_worker().cloned())
                    .unwrap_or_else(|| WorkerId::from("unknown"));
                notices.extend(self.apply_override(&mut case, level, &by));
            }

            if case.status.is_terminal() {
                case.discharged_at = Some(now);
                notices.push(Notice::to(stage, NotificationKind::CaseDischarged));
            }

            self.commit(guard, "complete_stage", before, case, notices)
                .await
        })
        .await
    }

    /// Route a case that has just completed its stage into `next`. Always
    /// drops the assignment; the new stage needs its own.
    pub async fn move_to_stage(&self, id: CaseId, next: &StageId) -> Result<Case> {
        self.observe("move_to_stage", id, async {
            let def = self.registry.require(next)?;
            let (guard, mut case) = self.checkout(id).await?;
            let action = format!("move to {next}");

            if case.is_terminal() {
                return Err(invalid(&case, action));
            }
            let completed_current = case
                .current_stage
                .as_ref()
                .and_then(|s| self.registry.get(s))
                .is_some_and(|current| current.completion_status == case.status);
            if !completed_current {
                return Err(Error::NotReadyToMove {
                    case: case.id,
                    status: case.status,
                });
            }
            if case.is_in_stage(next) || !def.accepts_from(case.status) {
                return Err(invalid(&case, action));
            }
            let arrival = def.arrival_status.unwrap_or(case.status);
            if !def.admits(arrival) {
                return Err(invalid(&case, action));
            }

            let now = self.clock.now();
            let before = case.status;
            let from = case.current_stage.take();
            if let Some(ref from) = from {
                case.push_previous(from.clone());
            }
            if def.diagnostic {
                if case.return_stage.is_none() {
                    case.return_stage = from.clone();
                }
            } else if case.return_stage.as_ref() == Some(next) {
                case.return_stage = None;
            }
            case.current_stage = Some(next.clone());
            case.status = arrival;
            case.assignment = None;
            case.mark_arrived(next, now);
            case.updated_at = now;

            let notices = vec![Notice::to(
                next,
                NotificationKind::CaseMoved {
                    from,
                    to: next.clone(),
                },
            )];
            self.commit(guard, "move_to_stage", before, case, notices)
                .await
        })
        .await
    }

    /// Step out of a diagnostic stage without finishing it, e.g. while
    /// waiting on an external result. Entry time is kept so the stage shows
    /// as paused; the assignment is dropped.
    pub async fn pause(&self, id: CaseId) -> Result<Case> {
        self.observe("pause", id, async {
            let (guard, mut case) = self.checkout(id).await?;
            let Some(def) = case
                .current_stage
                .as_ref()
                .and_then(|s| self.registry.get(s))
            else {
                return Err(invalid(&case, "pause"));
            };
            if !def.diagnostic || !def.is_active(case.status) {
                return Err(invalid(&case, format!("pause {}", def.id)));
            }
            let Some(fallback) = def.pause_status() else {
                return Err(invalid(&case, format!("pause {}", def.id)));
            };

            let stage = def.id.clone();
            let before = case.status;
            case.status = fallback;
            case.assignment = None;
            case.updated_at = self.clock.now();

            let notices = vec![Notice::to(
                &stage,
                NotificationKind::CasePaused {
                    stage: stage.clone(),
                },
            )];
            self.commit(guard, "pause", before, case, notices).await
        })
        .await
    }

    /// Park a case that has arrived in a payment-gated stage until billing
    /// clears it.
    pub async fn hold_for_payment(&self, id: CaseId) -> Result<Case> {
        self.observe("hold_for_payment", id, async {
            let (guard, mut case) = self.checkout(id).await?;
            let def = case
                .current_stage
                .as_ref()
                .and_then(|s| self.registry.get(s));
            let hold = def.and_then(|d| {
                let arrived = d.arrival_status == Some(case.status);
                d.payment_hold_status.filter(|_| arrived)
            });
            let (Some(def), Some(hold)) = (def, hold) else {
                return Err(invalid(&case, "hold for payment"));
            };

            let stage = def.id.clone();
            let before = case.status;
            case.status = hold;
            case.updated_at = self.clock.now();

            let notices = vec![Notice::to(
                &stage,
                NotificationKind::PaymentHold {
                    stage: stage.clone(),
                },
            )];
            self.commit(guard, "hold_for_payment", before, case, notices)
                .await
        })
        .await
    }

    /// End the journey after a terminal-capable stage has completed.
    pub async fn discharge(&self, id: CaseId) -> Result<Case> {
        self.observe("discharge", id, async {
            let (guard, mut case) = self.checkout(id).await?;
            let def = case
                .current_stage
                .as_ref()
                .and_then(|s| self.registry.get(s))
                .filter(|d| d.terminal_capable && d.completion_status == case.status);
            let Some(def) = def else {
                return Err(invalid(&case, "discharge"));
            };

            let stage = def.id.clone();
            let now = self.clock.now();
            let before = case.status;
            case.status = Status::Discharged;
            case.return_stage = None;
            case.discharged_at = Some(now);
            case.updated_at = now;

            let notices = vec![Notice::to(&stage, NotificationKind::CaseDischarged)];
            self.commit(guard, "discharge", before, case, notices).await
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Priority and ancillary flags
    // -----------------------------------------------------------------------

    /// Store fresh measurements. A strictly more severe suggestion is adopted
    /// automatically; a milder one never lowers the level.
    pub async fn record_measurements(
        &self,
        id: CaseId,
        measurements: Measurements,
    ) -> Result<PriorityAssessment> {
        self.observe("record_measurements", id, async {
            let (guard, mut case) = self.checkout(id).await?;
            if case.is_terminal() {
                return Err(invalid(&case, "record measurements"));
            }
            let before = case.status;
            case.updated_at = self.clock.now();
            let (assessment, notices) = self.apply_measurements(&mut case, measurements);
            self.commit(guard, "record_measurements", before, case, notices)
                .await?;
            Ok(assessment)
        })
        .await
    }

    /// Explicit operator choice of priority. May lower it. Always audited.
    pub async fn override_priority(
        &self,
        id: CaseId,
        level: Priority,
        by: &WorkerId,
    ) -> Result<Case> {
        self.observe("override_priority", id, async {
            let (guard, mut case) = self.checkout(id).await?;
            if case.is_terminal() {
                return Err(invalid(&case, "override priority"));
            }
            if case.priority == level {
                return Ok(case);
            }
            let before = case.status;
            case.updated_at = self.clock.now();
            let notices = self.apply_override(&mut case, level, by);
            self.commit(guard, "override_priority", before, case, notices)
                .await
        })
        .await
    }

    /// Toggle a pending-ancillary flag. Called by companion subsystems.
    pub async fn set_pending(&self, id: CaseId, ancillary: Ancillary, pending: bool) -> Result<Case> {
        self.observe("set_pending", id, async {
            let (guard, mut case) = self.checkout(id).await?;
            if case.is_terminal() {
                return Err(invalid(&case, format!("flag {ancillary}")));
            }
            if case.pending.get(ancillary) == pending {
                return Ok(case);
            }
            let before = case.status;
            case.pending.set(ancillary, pending);
            case.updated_at = self.clock.now();

            // Addressed to the stage that works this ancillary, if any.
            let stage = self
                .registry
                .iter()
                .find(|s| s.clears_pending == Some(ancillary))
                .map(|s| s.id.clone());
            let notices = vec![Notice::broadcast(
                stage,
                NotificationKind::PendingChanged { ancillary, pending },
            )];
            self.commit(guard, "set_pending", before, case, notices)
                .await
        })
        .await
    }

    fn apply_measurements(
        &self,
        case: &mut Case,
        measurements: Measurements,
    ) -> (PriorityAssessment, Vec<Notice>) {
        let previous = case.priority;
        let suggested = priority::compute(&measurements);
        let adopted = priority::escalate(previous, suggested);
        case.measurements = Some(measurements);
        case.priority = adopted;

        let assessment = PriorityAssessment {
            previous,
            suggested,
            adopted,
        };
        if !assessment.escalated() {
            return (assessment, Vec::new());
        }

        tracing::info!(
            case = %case.id,
            from = %previous,
            to = %adopted,
            triggers = ?priority::contributing(&measurements),
            "priority escalated"
        );
        metrics::priority_changes().add(
            1,
            &[
                KeyValue::new("source", "measurements"),
                KeyValue::new("to", adopted.to_string()),
            ],
        );
        let notices = vec![Notice::broadcast(
            self.home_stage(case),
            NotificationKind::PriorityEscalated {
                from: previous,
                to: adopted,
            },
        )];
        (assessment, notices)
    }

    fn apply_override(&self, case: &mut Case, level: Priority, by: &WorkerId) -> Vec<Notice> {
        let previous = case.priority;
        if previous == level {
            return Vec::new();
        }
        case.priority = level;

        // Audit trail for manual changes, downgrades in particular.
        tracing::info!(
            case = %case.id,
            from = %previous,
            to = %level,
            by = %by,
            downgrade = level < previous,
            "priority overridden"
        );
        metrics::priority_changes().add(
            1,
            &[
                KeyValue::new("source", "override"),
                KeyValue::new("to", level.to_string()),
            ],
        );
        vec![Notice::broadcast(
            self.home_stage(case),
            NotificationKind::PriorityOverridden {
                from: previous,
                to: level,
                by: by.clone(),
            },
        )]
    }
}
