//! Priority levels and the intake measurements they are derived from.

use serde::{Deserialize, Serialize};

/// Urgency classification. Declaration order is severity order, so
/// `Critical > Urgent > Normal`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    Urgent,
    Critical,
}

impl Priority {
    /// Urgent or critical.
    pub fn is_emergency(self) -> bool {
        self >= Priority::Urgent
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
            Priority::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s {
            "normal" => Ok(Priority::Normal),
            "urgent" => Ok(Priority::Urgent),
            "critical" => Ok(Priority::Critical),
            _ => Err(crate::error::Error::Other(format!("unknown priority: {s}"))),
        }
    }
}

/// A set of intake measurements. Every field is optional; a missing field
/// can never raise the priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    /// Systolic blood pressure, mmHg.
    pub systolic: Option<f64>,
    /// Diastolic blood pressure, mmHg.
    pub diastolic: Option<f64>,
    /// Beats per minute.
    pub pulse: Option<f64>,
    /// Degrees Celsius.
    pub temperature: Option<f64>,
    /// Percent.
    pub oxygen_saturation: Option<f64>,
    /// Breaths per minute.
    pub respiratory_rate: Option<f64>,
}

impl Measurements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blood_pressure(mut self, systolic: f64, diastolic: f64) -> Self {
        self.systolic = Some(systolic);
        self.diastolic = Some(diastolic);
        self
    }

    pub fn pulse(mut self, bpm: f64) -> Self {
        self.pulse = Some(bpm);
        self
    }

    pub fn temperature(mut self, celsius: f64) -> Self {
        self.temperature = Some(celsius);
        self
    }

    pub fn oxygen_saturation(mut self, percent: f64) -> Self {
        self.oxygen_saturation = Some(percent);
        self
    }

    pub fn respiratory_rate(mut self, per_minute: f64) -> Self {
        self.respiratory_rate = Some(per_minute);
        self
    }
}
