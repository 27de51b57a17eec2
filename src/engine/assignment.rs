//! Exclusive worker ownership of a case within its stage.

use opentelemetry::KeyValue;

use super::{Engine, Notice};
use crate::error::{Error, Result};
use crate::model::{Assignment, Case, CaseId, NotificationKind, Worker};
use crate::telemetry::metrics;

impl Engine {
    /// Claim a case for `worker`. Idempotent for the current holder.
    ///
    /// The case must be in the worker's stage; an unrouted case counts as
    /// being in the intake stage.
    pub async fn assign(&self, id: CaseId, worker: &Worker) -> Result<Case> {
        self.observe("assign", id, async {
            self.registry.require(&worker.stage)?;
            let (guard, mut case) = self.checkout(id).await?;

            if case.is_terminal() {
                return Err(Error::InvalidTransition {
                    case: case.id,
                    status: case.status,
                    action: "assign".to_string(),
                });
            }
            if let Some(ref held) = case.assignment {
                if held.worker == worker.id {
                    return Ok(case);
                }
                return Err(Error::AlreadyAssigned {
                    case: case.id,
                    holder: held.worker.clone(),
                });
            }
            let effective = self.registry.effective_stage(&case);
            if effective.as_ref() != Some(&worker.stage) {
                return Err(Error::StageMismatch {
                    case: case.id,
                    worker_stage: worker.stage.clone(),
                    case_stage: effective,
                });
            }

            let now = self.clock.now();
            let before = case.status;
            case.assignment = Some(Assignment {
                worker: worker.id.clone(),
                stage: worker.stage.clone(),
                assigned_at: now,
            });
            case.updated_at = now;

            metrics::assignments().add(
                1,
                &[
                    KeyValue::new("operation", "assign"),
                    KeyValue::new("stage", worker.stage.to_string()),
                ],
            );
            let notices = vec![Notice::to(
                &worker.stage,
                NotificationKind::CaseAssigned {
                    worker: worker.id.clone(),
                    stage: worker.stage.clone(),
                },
            )];
            self.commit(guard, "assign", before, case, notices).await
        })
        .await
    }

    /// Hand a case back to the pool.
    ///
    /// Refused once the stage it was assigned for has been completed, or
    /// once the case has left that stage.
    pub async fn release(&self, id: CaseId) -> Result<Case> {
        self.observe("release", id, async {
            let (guard, mut case) = self.checkout(id).await?;

            let Some(held) = case.assignment.clone() else {
                return Err(Error::InvalidTransition {
                    case: case.id,
                    status: case.status,
                    action: "release unassigned case".to_string(),
                });
            };
            if case.timestamps(&held.stage).is_completed() {
                return Err(Error::CannotReleaseCompleted {
                    case: case.id,
                    stage: held.stage,
                });
            }
            if self.registry.effective_stage(&case).as_ref() != Some(&held.stage) {
                return Err(Error::CannotReleaseMoved {
                    case: case.id,
                    assigned_stage: held.stage,
                });
            }

            let before = case.status;
            case.assignment = None;
            case.updated_at = self.clock.now();

            metrics::assignments().add(
                1,
                &[
                    KeyValue::new("operation", "release"),
                    KeyValue::new("stage", held.stage.to_string()),
                ],
            );
            let notices = vec![Notice::to(
                &held.stage,
                NotificationKind::CaseReleased {
                    worker: held.worker.clone(),
                    stage: held.stage.clone(),
                },
            )];
            self.commit(guard, "release", before, case, notices).await
        })
        .await
    }
}
