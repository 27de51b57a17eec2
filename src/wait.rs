//! Wait-time tracker.
//!
//! Wait time for a case in a stage is `now - anchor`, where the anchor is the
//! stage's entry time, else its arrival time, else the case's registration
//! time. Values are clamped at zero and never decrease for a case that stays
//! in the same stage, so a skewed or rewound clock cannot make a queue look
//! like it is getting shorter.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::model::{Case, CaseId, StageId};
use crate::registry::StageRegistry;
use crate::telemetry::metrics;

/// Minutes at which each band starts.
const ELEVATED_MINUTES: i64 = 10;
const HIGH_MINUTES: i64 = 20;
const SEVERE_MINUTES: i64 = 30;

/// Classification of a wait, for colouring in whatever renders queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitBand {
    Normal,
    Elevated,
    High,
    Severe,
}

impl WaitBand {
    /// `< 10` normal, `10..20` elevated, `20..30` high, `>= 30` severe.
    pub fn classify(minutes: i64) -> Self {
        match minutes {
            m if m >= SEVERE_MINUTES => WaitBand::Severe,
            m if m >= HIGH_MINUTES => WaitBand::High,
            m if m >= ELEVATED_MINUTES => WaitBand::Elevated,
            _ => WaitBand::Normal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WaitBand::Normal => "normal",
            WaitBand::Elevated => "elevated",
            WaitBand::High => "high",
            WaitBand::Severe => "severe",
        }
    }
}

/// One case's wait in one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitTime {
    pub case_id: CaseId,
    pub stage: StageId,
    pub anchor: DateTime<Utc>,
    /// Never negative.
    pub waited: Duration,
    pub band: WaitBand,
    pub computed_at: DateTime<Utc>,
}

impl WaitTime {
    pub fn minutes(&self) -> i64 {
        self.waited.num_minutes()
    }
}

/// Highest wait seen for a (case, stage, anchor).
#[derive(Debug, Clone, Copy)]
struct HighWater {
    anchor: DateTime<Utc>,
    waited: Duration,
}

pub struct WaitTimeTracker {
    registry: Arc<StageRegistry>,
    clock: Arc<dyn Clock>,
    high_water: RwLock<HashMap<(CaseId, StageId), HighWater>>,
    latest: RwLock<HashMap<CaseId, WaitTime>>,
}

impl WaitTimeTracker {
    pub fn new(registry: Arc<StageRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            high_water: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }

    /// On-demand wait for `case` in `stage`, as of now.
    pub fn compute(&self, case: &Case, stage: &StageId) -> WaitTime {
        let now = self.clock.now();
        let anchor = case.wait_anchor(stage);
        let raw = (now - anchor).max(Duration::zero());

        let key = (case.id, stage.clone());
        let waited = {
            let mut high_water = self.high_water.write();
            let entry = high_water.entry(key).or_insert(HighWater {
                anchor,
                waited: raw,
            });
            if entry.anchor != anchor {
                // Re-entered the stage: start over.
                *entry = HighWater {
                    anchor,
                    waited: raw,
                };
            } else if raw > entry.waited {
                entry.waited = raw;
            }
            entry.waited
        };

        WaitTime {
            case_id: case.id,
            stage: stage.clone(),
            anchor,
            waited,
            band: WaitBand::classify(waited.num_minutes()),
            computed_at: now,
        }
    }

    /// Recompute waits for every active case in the stage it is waiting in.
    /// Replaces the previous tick's results.
    pub fn recompute(&self, cases: &[Case]) -> Vec<WaitTime> {
        let waits: Vec<WaitTime> = cases
            .iter()
            .filter(|c| !c.is_terminal())
            .filter_map(|c| {
                self.registry
                    .effective_stage(c)
                    .map(|stage| self.compute(c, &stage))
            })
            .collect();

        let histogram = metrics::wait_minutes();
        for w in &waits {
            histogram.record(
                w.waited.num_seconds() as f64 / 60.0,
                &[
                    KeyValue::new("stage", w.stage.to_string()),
                    KeyValue::new("band", w.band.as_str()),
                ],
            );
        }

        // Forget cases that left the active set.
        {
            let mut high_water = self.high_water.write();
            high_water.retain(|(id, stage), _| {
                waits.iter().any(|w| w.case_id == *id && &w.stage == stage)
            });
        }
        *self.latest.write() = waits.iter().map(|w| (w.case_id, w.clone())).collect();

        tracing::debug!(cases = waits.len(), "wait times recomputed");
        waits
    }

    /// Result of the last tick for one case.
    pub fn latest(&self, case_id: CaseId) -> Option<WaitTime> {
        self.latest.read().get(&case_id).cloned()
    }

    /// Results of the last tick for one stage, longest wait first.
    pub fn for_stage(&self, stage: &StageId) -> Vec<WaitTime> {
        let mut waits: Vec<_> = self
            .latest
            .read()
            .values()
            .filter(|w| &w.stage == stage)
            .cloned()
            .collect();
        waits.sort_by(|a, b| b.waited.cmp(&a.waited).then(a.case_id.cmp(&b.case_id)));
        waits
    }
}
