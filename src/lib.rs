//! # caseflow
//!
//! Workflow and queue engine for cases moving through ordered service
//! stages (intake, assessment, diagnostics, fulfilment, checkout).
//!
//! The [`engine::Engine`] holds every case's stage, status and history,
//! enforces legal transitions, arbitrates exclusive worker assignment,
//! derives priority from intake measurements, resolves per-stage queues,
//! tracks wait times and emits notifications. Persistence, payment and
//! cross-stage inboxes are collaborators behind
//! [`repository::CaseRepository`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod priority;
pub mod queue;
pub mod registry;
pub mod repository;
pub mod store;
pub mod telemetry;
pub mod wait;
