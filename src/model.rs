//! Core data model.
//!
//! A case is a person moving through ordered service stages. It carries one
//! closed status, the stage it is currently in, per-stage timestamps, the
//! worker that owns it (if any), and a priority derived from intake
//! measurements.

pub mod case;
pub mod notification;
pub mod stage;
pub mod status;
pub mod vitals;

pub use case::{
    Ancillary, AncillaryFlags, Assignment, Case, CaseId, NewCase, StageTimestamps, StageVisit,
    Worker, WorkerId,
};
pub use notification::{Notification, NotificationId, NotificationKind, Severity};
pub use stage::{StageDefinition, StageId};
pub use status::Status;
pub use vitals::{Measurements, Priority};
