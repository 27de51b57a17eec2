//! Stage registry.
//!
//! Static definition of the stages a case can pass through, in display
//! order. The engine, queue resolver and wait-time tracker read every
//! stage-specific rule from here. A registry can be loaded from TOML, one
//! `[[stage]]` table per stage.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{Ancillary, Case, StageDefinition, StageId, Status};

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    stage: Vec<StageDefinition>,
}

/// Registry of stage definitions, ordered by position.
#[derive(Debug, Clone)]
pub struct StageRegistry {
    stages: Vec<StageDefinition>,
    index: HashMap<StageId, usize>,
}

impl StageRegistry {
    /// Build a registry from definitions, validating them.
    pub fn new(mut stages: Vec<StageDefinition>) -> Result<Self> {
        stages.sort_by_key(|s| s.position);

        let mut index = HashMap::new();
        let mut active = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            if index.insert(stage.id.clone(), i).is_some() {
                return Err(Error::Config(format!("duplicate stage id {}", stage.id)));
            }
            if let Some(other) = active.insert(stage.active_status, &stage.id) {
                return Err(Error::Config(format!(
                    "stages {other} and {} share active status {}",
                    stage.id, stage.active_status
                )));
            }
            if stage.admits(stage.active_status) {
                return Err(Error::Config(format!(
                    "stage {} lists its own active status as an entry status",
                    stage.id
                )));
            }
            if stage.completion_status == stage.active_status {
                return Err(Error::Config(format!(
                    "stage {} completes into its own active status",
                    stage.id
                )));
            }
            if stage.payment_gated && stage.entry_statuses.is_empty() {
                return Err(Error::Config(format!(
                    "payment-gated stage {} has no entry statuses",
                    stage.id
                )));
            }
        }

        let registry = Self { stages, index };
        for stage in &registry.stages {
            if let Some(status) = stage
                .from_statuses
                .iter()
                .find(|s| !registry.is_completion_status(**s))
            {
                return Err(Error::Config(format!(
                    "stage {} can be moved into from {status}, which completes no stage",
                    stage.id
                )));
            }
        }
        Ok(registry)
    }

    /// Parse a registry from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(content)
            .map_err(|e| Error::Config(format!("bad stage registry: {e}")))?;
        Self::new(file.stage)
    }

    /// Load a registry from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read stage registry {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// The built-in six-stage journey: triage, consultation, laboratory,
    /// radiology, pharmacy, checkout.
    pub fn builtin() -> Self {
        let stages = builtin_stages();
        let index = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        Self { stages, index }
    }

    /// Look up a stage by id.
    pub fn get(&self, id: &StageId) -> Option<&StageDefinition> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Look up a stage, failing with `UnknownStage`.
    pub fn require(&self, id: &StageId) -> Result<&StageDefinition> {
        self.get(id).ok_or_else(|| Error::UnknownStage(id.clone()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.iter()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The intake/assessment stage: the first one with pre-entry statuses.
    pub fn intake_stage(&self) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| !s.pre_entry_statuses.is_empty())
    }

    /// Does `status` mean some stage has just been completed?
    pub fn is_completion_status(&self, status: Status) -> bool {
        self.stages.iter().any(|s| s.completion_status == status)
    }

    /// The stage a case belongs to for assignment purposes: its current
    /// stage, or the intake stage while it waits there unrouted.
    pub fn effective_stage(&self, case: &Case) -> Option<StageId> {
        if let Some(ref current) = case.current_stage {
            return Some(current.clone());
        }
        self.intake_stage()
            .filter(|intake| intake.is_pre_entry(case.status))
            .map(|intake| intake.id.clone())
    }

    /// Is the case visible in `stage`'s queues at all?
    pub fn is_relevant(&self, case: &Case, stage: &StageDefinition) -> bool {
        if case.is_terminal() {
            return false;
        }
        case.is_in_stage(&stage.id) || (stage.is_pre_entry(case.status) && case.current_stage.is_none())
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_stages() -> Vec<StageDefinition> {
    vec![
        StageDefinition {
            id: StageId::from(StageId::TRIAGE),
            label: "Triage".to_string(),
            position: 10,
            entry_statuses: vec![Status::Registered],
            active_status: Status::InTriage,
            completion_status: Status::TriageComplete,
            arrival_status: None,
            from_statuses: Vec::new(),
            payment_hold_status: None,
            pre_entry_statuses: vec![Status::Registered],
            diagnostic: false,
            payment_gated: false,
            emergency_bypass: false,
            terminal_capable: false,
            clears_pending: None,
        },
        StageDefinition {
            id: StageId::from(StageId::CONSULTATION),
            label: "General Consultation".to_string(),
            position: 20,
            entry_statuses: vec![
                Status::TriageComplete,
                Status::Registered,
                Status::LabResultsReceived,
                Status::RadiologyResultsReceived,
            ],
            active_status: Status::InConsultation,
            completion_status: Status::ConsultationComplete,
            arrival_status: None,
            from_statuses: vec![
                Status::TriageComplete,
                Status::LabResultsReceived,
                Status::RadiologyResultsReceived,
            ],
            payment_hold_status: None,
            pre_entry_statuses: Vec::new(),
            diagnostic: false,
            payment_gated: false,
            emergency_bypass: false,
            terminal_capable: true,
            clears_pending: None,
        },
        StageDefinition {
            id: StageId::from(StageId::LABORATORY),
            label: "Laboratory".to_string(),
            position: 30,
            entry_statuses: vec![Status::SentToLab, Status::AwaitingPaymentLab],
            active_status: Status::InLab,
            completion_status: Status::LabResultsReceived,
            arrival_status: Some(Status::SentToLab),
            from_statuses: vec![Status::ConsultationComplete],
            payment_hold_status: Some(Status::AwaitingPaymentLab),
            pre_entry_statuses: Vec::new(),
            diagnostic: true,
            payment_gated: true,
            emergency_bypass: false,
            terminal_capable: false,
            clears_pending: Some(Ancillary::Lab),
        },
        StageDefinition {
            id: StageId::from(StageId::RADIOLOGY),
            label: "Radiology".to_string(),
            position: 40,
            entry_statuses: vec![Status::SentToRadiology, Status::AwaitingPaymentRadiology],
            active_status: Status::InRadiology,
            completion_status: Status::RadiologyResultsReceived,
            arrival_status: Some(Status::SentToRadiology),
            from_statuses: vec![Status::ConsultationComplete],
            payment_hold_status: Some(Status::AwaitingPaymentRadiology),
            pre_entry_statuses: Vec::new(),
            diagnostic: true,
            payment_gated: true,
            emergency_bypass: true,
            terminal_capable: false,
            clears_pending: Some(Ancillary::Radiology),
        },
        StageDefinition {
            id: StageId::from(StageId::PHARMACY),
            label: "Pharmacy".to_string(),
            position: 50,
            entry_statuses: vec![Status::SentToPharmacy, Status::AwaitingPaymentPharmacy],
            active_status: Status::InPharmacy,
            completion_status: Status::MedicationDispensed,
            arrival_status: Some(Status::SentToPharmacy),
            from_statuses: vec![Status::ConsultationComplete],
            payment_hold_status: Some(Status::AwaitingPaymentPharmacy),
            pre_entry_statuses: Vec::new(),
            diagnostic: false,
            payment_gated: true,
            emergency_bypass: false,
            terminal_capable: true,
            clears_pending: Some(Ancillary::Pharmacy),
        },
        StageDefinition {
            id: StageId::from(StageId::CHECKOUT),
            label: "Checkout".to_string(),
            position: 60,
            entry_statuses: vec![Status::AwaitingPayment],
            active_status: Status::InCheckout,
            completion_status: Status::Discharged,
            arrival_status: Some(Status::AwaitingPayment),
            from_statuses: vec![Status::ConsultationComplete, Status::MedicationDispensed],
            payment_hold_status: None,
            pre_entry_statuses: Vec::new(),
            diagnostic: false,
            payment_gated: false,
            emergency_bypass: false,
            terminal_capable: true,
            clears_pending: None,
        },
    ]
}
