//! The closed case status enumeration.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle marker of a case, within and across stages.
///
/// Stage definitions decide which of these mean "in the stage", "done with
/// the stage", or "waiting to enter"; the enum itself only knows about the
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Registered,
    InTriage,
    TriageComplete,
    InConsultation,
    ConsultationComplete,
    SentToLab,
    AwaitingPaymentLab,
    InLab,
    LabResultsReceived,
    SentToRadiology,
    AwaitingPaymentRadiology,
    InRadiology,
    RadiologyResultsReceived,
    SentToPharmacy,
    AwaitingPaymentPharmacy,
    InPharmacy,
    MedicationDispensed,
    AwaitingPayment,
    InCheckout,
    /// Journey finished. Retained for history, never in an active queue.
    Discharged,
}

impl Status {
    pub const ALL: [Status; 20] = [
        Status::Registered,
        Status::InTriage,
        Status::TriageComplete,
        Status::InConsultation,
        Status::ConsultationComplete,
        Status::SentToLab,
        Status::AwaitingPaymentLab,
        Status::InLab,
        Status::LabResultsReceived,
        Status::SentToRadiology,
        Status::AwaitingPaymentRadiology,
        Status::InRadiology,
        Status::RadiologyResultsReceived,
        Status::SentToPharmacy,
        Status::AwaitingPaymentPharmacy,
        Status::InPharmacy,
        Status::MedicationDispensed,
        Status::AwaitingPayment,
        Status::InCheckout,
        Status::Discharged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Registered => "registered",
            Status::InTriage => "in-triage",
            Status::TriageComplete => "triage-complete",
            Status::InConsultation => "in-consultation",
            Status::ConsultationComplete => "consultation-complete",
            Status::SentToLab => "sent-to-lab",
            Status::AwaitingPaymentLab => "awaiting-payment-lab",
            Status::InLab => "in-lab",
            Status::LabResultsReceived => "lab-results-received",
            Status::SentToRadiology => "sent-to-radiology",
            Status::AwaitingPaymentRadiology => "awaiting-payment-radiology",
            Status::InRadiology => "in-radiology",
            Status::RadiologyResultsReceived => "radiology-results-received",
            Status::SentToPharmacy => "sent-to-pharmacy",
            Status::AwaitingPaymentPharmacy => "awaiting-payment-pharmacy",
            Status::InPharmacy => "in-pharmacy",
            Status::MedicationDispensed => "medication-dispensed",
            Status::AwaitingPayment => "awaiting-payment",
            Status::InCheckout => "in-checkout",
            Status::Discharged => "discharged",
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Discharged)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Other(format!("unknown status: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_agree() {
        for status in Status::ALL {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&Status::AwaitingPaymentLab).unwrap();
        assert_eq!(json, "\"awaiting-payment-lab\"");
    }

    #[test]
    fn only_discharged_is_terminal() {
        let terminal: Vec<_> = Status::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Status::Discharged]);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("in-limbo".parse::<Status>().is_err());
    }
}
