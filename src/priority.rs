//! Priority calculator.
//!
//! Pure mapping from a measurement set to an urgency level. Each measurement
//! is checked against a severe band and a moderate band; the most severe hit
//! wins. Missing or non-finite readings never escalate.
//!
//! | measurement        | critical            | urgent              |
//! |--------------------|---------------------|---------------------|
//! | oxygen saturation  | < 90 %              | < 95 %              |
//! | systolic pressure  | >= 180 or < 90      | >= 140 or < 100     |
//! | diastolic pressure | >= 120 or < 50      | >= 90 or < 60       |
//! | pulse              | >= 130 or < 40      | >= 100 or < 50      |
//! | temperature (C)    | >= 40.0 or < 35.0   | >= 38.0 or < 36.0   |
//! | respiratory rate   | >= 30 or < 8        | >= 21 or < 12       |

use crate::model::{Measurements, Priority};

/// A closed band: values below `low` or at/above `high` are out of range.
#[derive(Debug, Clone, Copy)]
struct Band {
    low: f64,
    high: f64,
}

impl Band {
    const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    fn is_outside(&self, value: f64) -> bool {
        value < self.low || value >= self.high
    }
}

/// Severe and moderate bands for one measurement.
#[derive(Debug, Clone, Copy)]
struct Threshold {
    name: &'static str,
    critical: Band,
    urgent: Band,
    read: fn(&Measurements) -> Option<f64>,
}

const THRESHOLDS: [Threshold; 6] = [
    Threshold {
        name: "oxygen_saturation",
        critical: Band::new(90.0, f64::INFINITY),
        urgent: Band::new(95.0, f64::INFINITY),
        read: |m| m.oxygen_saturation,
    },
    Threshold {
        name: "systolic",
        critical: Band::new(90.0, 180.0),
        urgent: Band::new(100.0, 140.0),
        read: |m| m.systolic,
    },
    Threshold {
        name: "diastolic",
        critical: Band::new(50.0, 120.0),
        urgent: Band::new(60.0, 90.0),
        read: |m| m.diastolic,
    },
    Threshold {
        name: "pulse",
        critical: Band::new(40.0, 130.0),
        urgent: Band::new(50.0, 100.0),
        read: |m| m.pulse,
    },
    Threshold {
        name: "temperature",
        critical: Band::new(35.0, 40.0),
        urgent: Band::new(36.0, 38.0),
        read: |m| m.temperature,
    },
    Threshold {
        name: "respiratory_rate",
        critical: Band::new(8.0, 30.0),
        urgent: Band::new(12.0, 21.0),
        read: |m| m.respiratory_rate,
    },
];

/// Classify one measurement set. Total over every input.
pub fn compute(measurements: &Measurements) -> Priority {
    THRESHOLDS
        .iter()
        .map(|t| classify(t, measurements))
        .max()
        .unwrap_or(Priority::Normal)
}

/// Names of the measurements that pushed the result above normal, most
/// severe first. Used for log context.
pub fn contributing(measurements: &Measurements) -> Vec<(&'static str, Priority)> {
    let mut hits: Vec<_> = THRESHOLDS
        .iter()
        .map(|t| (t.name, classify(t, measurements)))
        .filter(|(_, p)| *p > Priority::Normal)
        .collect();
    hits.sort_by(|a, b| b.1.cmp(&a.1));
    hits
}

/// Level to store given the current one and a fresh suggestion. Only strictly
/// more severe suggestions are adopted automatically.
pub fn escalate(current: Priority, suggested: Priority) -> Priority {
    current.max(suggested)
}

fn classify(threshold: &Threshold, measurements: &Measurements) -> Priority {
    let Some(value) = (threshold.read)(measurements).filter(|v| v.is_finite()) else {
        return Priority::Normal;
    };
    if threshold.critical.is_outside(value) {
        Priority::Critical
    } else if threshold.urgent.is_outside(value) {
        Priority::Urgent
    } else {
        Priority::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normal_vitals() -> Measurements {
        Measurements::new()
            .blood_pressure(120.0, 80.0)
            .pulse(72.0)
            .temperature(36.8)
            .oxygen_saturation(98.0)
            .respiratory_rate(16.0)
    }

    #[test]
    fn low_oxygen_is_critical() {
        let m = Measurements::new().oxygen_saturation(89.0);
        assert_eq!(compute(&m), Priority::Critical);
    }

    #[test]
    fn all_normal_bands_yield_normal() {
        assert_eq!(compute(&normal_vitals()), Priority::Normal);
    }

    #[test]
    fn empty_measurements_yield_normal() {
        assert_eq!(compute(&Measurements::new()), Priority::Normal);
    }

    #[test]
    fn non_finite_values_cannot_escalate() {
        let m = Measurements::new()
            .oxygen_saturation(f64::NAN)
            .pulse(f64::INFINITY);
        assert_eq!(compute(&m), Priority::Normal);
    }

    #[test]
    fn moderate_band_yields_urgent() {
        let m = normal_vitals().temperature(38.5);
        assert_eq!(compute(&m), Priority::Urgent);

        let m = normal_vitals().pulse(105.0);
        assert_eq!(compute(&m), Priority::Urgent);
    }

    #[test]
    fn band_edges() {
        assert_eq!(compute(&Measurements::new().oxygen_saturation(90.0)), Priority::Urgent);
        assert_eq!(compute(&Measurements::new().oxygen_saturation(95.0)), Priority::Normal);
        assert_eq!(compute(&Measurements::new().blood_pressure(180.0, 80.0)), Priority::Critical);
        assert_eq!(compute(&Measurements::new().blood_pressure(139.0, 89.0)), Priority::Normal);
        assert_eq!(compute(&Measurements::new().respiratory_rate(7.0)), Priority::Critical);
    }

    #[test]
    fn most_severe_measurement_wins() {
        let m = normal_vitals().temperature(38.5).blood_pressure(185.0, 80.0);
        assert_eq!(compute(&m), Priority::Critical);
        let hits = contributing(&m);
        assert_eq!(hits[0], ("systolic", Priority::Critical));
        assert_eq!(hits[1], ("temperature", Priority::Urgent));
    }

    #[test]
    fn escalation_never_downgrades() {
        assert_eq!(escalate(Priority::Critical, Priority::Normal), Priority::Critical);
        assert_eq!(escalate(Priority::Urgent, Priority::Critical), Priority::Critical);
        assert_eq!(escalate(Priority::Normal, Priority::Normal), Priority::Normal);
    }
}
