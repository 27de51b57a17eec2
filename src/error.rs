//! Error types for caseflow.
//!
//! Business-rule failures (a request the workflow does not allow right now)
//! are kept apart from invariant violations, which mean the engine itself has
//! a bug. Collaborator failures leave case state untouched.

use thiserror::Error;

use crate::model::{CaseId, StageId, Status, WorkerId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("case not found: {0}")]
    CaseNotFound(CaseId),

    #[error("unknown stage: {0}")]
    UnknownStage(StageId),

    #[error("invalid transition for case {case}: {status} cannot {action}")]
    InvalidTransition {
        case: CaseId,
        status: Status,
        action: String,
    },

    #[error("case {case} has not completed its current stage (status {status})")]
    NotReadyToMove { case: CaseId, status: Status },

    #[error("case {case} is already assigned to {holder}")]
    AlreadyAssigned { case: CaseId, holder: WorkerId },

    #[error(
        "case {case} is not in stage {worker_stage} (current: {})",
        .case_stage.as_ref().map_or("none", StageId::as_str)
    )]
    StageMismatch {
        case: CaseId,
        worker_stage: StageId,
        /// `None` while the case is not in any stage's queue.
        case_stage: Option<StageId>,
    },

    #[error("case {case} already completed {stage}; assignment cannot be released")]
    CannotReleaseCompleted { case: CaseId, stage: StageId },

    #[error("case {case} moved from {assigned_stage}; assignment cannot be released")]
    CannotReleaseMoved {
        case: CaseId,
        assigned_stage: StageId,
    },

    #[error("payment not cleared for case {case} at {stage}")]
    PaymentRequired { case: CaseId, stage: StageId },

    #[error("collaborator call {operation} timed out")]
    CollaboratorTimeout { operation: &'static str },

    #[error("collaborator call {operation} failed: {message}")]
    CollaboratorError {
        operation: &'static str,
        message: String,
    },

    /// A local invariant would be broken. Always a bug in the engine.
    #[error("invariant violated for case {case}: {detail}")]
    InvariantViolation { case: CaseId, detail: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Expected, user-facing workflow rejections. Everything else is either a
    /// collaborator problem or a defect.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            Error::InvalidTransition { .. }
                | Error::NotReadyToMove { .. }
                | Error::AlreadyAssigned { .. }
                | Error::StageMismatch { .. }
                | Error::CannotReleaseCompleted { .. }
                | Error::CannotReleaseMoved { .. }
                | Error::PaymentRequired { .. }
                | Error::CaseNotFound(_)
                | Error::UnknownStage(_)
        )
    }

    /// Short machine-readable label, used for metric attributes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::CaseNotFound(_) => "case_not_found",
            Error::UnknownStage(_) => "unknown_stage",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::NotReadyToMove { .. } => "not_ready_to_move",
            Error::AlreadyAssigned { .. } => "already_assigned",
            Error::StageMismatch { .. } => "stage_mismatch",
            Error::CannotReleaseCompleted { .. } => "cannot_release_completed",
            Error::CannotReleaseMoved { .. } => "cannot_release_moved",
            Error::PaymentRequired { .. } => "payment_required",
            Error::CollaboratorTimeout { .. } => "collaborator_timeout",
            Error::CollaboratorError { .. } => "collaborator_error",
            Error::InvariantViolation { .. } => "invariant_violation",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
