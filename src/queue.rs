//! Queue resolver.
//!
//! Computes, for one stage and one viewing worker, the four queue partitions
//! from a snapshot of the case store. Partitions are disjoint except `mine`
//! and `in_progress`, which overlap when the viewer is working a case.
//!
//! Reads are eventually consistent: a case may sit in a stale partition for
//! one refresh.

use std::cmp::Reverse;
use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::model::{Case, StageDefinition, StageId, WorkerId};
use crate::registry::StageRegistry;

/// Which priorities a partition keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityFilter {
    /// Urgent and critical.
    Emergency,
    Normal,
}

/// Optional narrowing applied to every partition.
#[derive(Debug, Clone, Default)]
pub struct QueueFilter {
    text: Option<String>,
    priority: Option<PriorityFilter>,
}

impl QueueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive substring match on name or identifier.
    pub fn text(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.text = (!query.trim().is_empty()).then_some(query);
        self
    }

    pub fn priority(mut self, filter: PriorityFilter) -> Self {
        self.priority = Some(filter);
        self
    }

    pub fn matches(&self, case: &Case) -> bool {
        if let Some(ref query) = self.text {
            if !case.matches_text(query) {
                return false;
            }
        }
        match self.priority {
            Some(PriorityFilter::Emergency) => case.priority.is_emergency(),
            Some(PriorityFilter::Normal) => !case.priority.is_emergency(),
            None => true,
        }
    }
}

/// The four partitions of one stage as seen by one worker. Each is ordered
/// by priority (most severe first), then by how long the case has been
/// waiting in the stage (oldest first).
#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    pub stage: StageId,
    pub worker: WorkerId,
    pub unassigned: Vec<Case>,
    pub mine: Vec<Case>,
    pub in_progress: Vec<Case>,
    pub paused: Vec<Case>,
}

impl QueueView {
    /// Distinct cases across all partitions.
    pub fn total(&self) -> usize {
        let mut ids: Vec<_> = self
            .unassigned
            .iter()
            .chain(&self.mine)
            .chain(&self.in_progress)
            .chain(&self.paused)
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}

/// Entered the stage, has not completed it, and is no longer actively in it.
pub fn is_paused(case: &Case, stage: &StageDefinition) -> bool {
    case.is_in_stage(&stage.id)
        && case.timestamps(&stage.id).is_open()
        && !stage.is_active(case.status)
}

pub struct QueueResolver {
    registry: Arc<StageRegistry>,
}

impl QueueResolver {
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self { registry }
    }

    pub fn resolve(
        &self,
        cases: &[Case],
        stage: &StageId,
        worker: &WorkerId,
        filter: &QueueFilter,
    ) -> Result<QueueView> {
        let definition = self.registry.require(stage)?;

        let mut view = QueueView {
            stage: stage.clone(),
            worker: worker.clone(),
            unassigned: Vec::new(),
            mine: Vec::new(),
            in_progress: Vec::new(),
            paused: Vec::new(),
        };

        let relevant = cases
            .iter()
            .filter(|c| self.registry.is_relevant(c, definition))
            .filter(|c| filter.matches(c));

        for case in relevant {
            let active = definition.is_active(case.status);
            let paused = is_paused(case, definition);
            let holder = case.assigned_worker();

            if holder == Some(worker) {
                view.mine.push(case.clone());
            }
            if active {
                view.in_progress.push(case.clone());
            }
            if paused && holder != Some(worker) {
                view.paused.push(case.clone());
            }
            if holder.is_none() && !active && !paused {
                view.unassigned.push(case.clone());
            }
        }

        for partition in [
            &mut view.unassigned,
            &mut view.mine,
            &mut view.in_progress,
            &mut view.paused,
        ] {
            sort_partition(partition, stage);
        }

        tracing::debug!(
            stage = %stage,
            worker = %worker,
            unassigned = view.unassigned.len(),
            mine = view.mine.len(),
            in_progress = view.in_progress.len(),
            paused = view.paused.len(),
            "queues resolved"
        );
        Ok(view)
    }
}

/// Priority descending, then wait anchor ascending, then id so that the
/// order never depends on snapshot iteration order.
fn sort_partition(cases: &mut [Case], stage: &StageId) {
    cases.sort_by_key(|c| (Reverse(c.priority), c.wait_anchor(stage), c.id));
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::model::{AncillaryFlags, CaseId, Priority, StageTimestamps, Status};

    fn case_in_triage(priority: Priority, entered_offset_min: i64) -> Case {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap();
        let stage = StageId::from(StageId::TRIAGE);
        let mut timeline = BTreeMap::new();
        timeline.insert(
            stage.clone(),
            StageTimestamps {
                arrived_at: Some(t0),
                entered_at: Some(t0 + Duration::minutes(entered_offset_min)),
                completed_at: None,
            },
        );
        Case {
            id: CaseId::new(),
            name: "Test".into(),
            identifier: "MRN".into(),
            status: Status::InTriage,
            current_stage: Some(stage),
            return_stage: None,
            previous_stages: Vec::new(),
            priority,
            assignment: None,
            timeline,
            history: Vec::new(),
            pending: AncillaryFlags::default(),
            measurements: None,
            registered_at: t0,
            updated_at: t0,
            discharged_at: None,
        }
    }

    #[test]
    fn ordering_is_priority_then_oldest_entry() {
        let stage = StageId::from(StageId::TRIAGE);
        let mut cases = vec![
            case_in_triage(Priority::Normal, 1),
            case_in_triage(Priority::Critical, 5),
            case_in_triage(Priority::Urgent, 2),
            case_in_triage(Priority::Critical, 3),
            case_in_triage(Priority::Normal, 0),
        ];
        sort_partition(&mut cases, &stage);

        for pair in cases.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            assert!(
                a.priority > b.priority
                    || (a.priority == b.priority
                        && a.wait_anchor(&stage) <= b.wait_anchor(&stage))
            );
        }
        assert_eq!(cases[0].priority, Priority::Critical);
        assert_eq!(cases[4].priority, Priority::Normal);
    }

    #[test]
    fn priority_filter_splits_emergency_from_normal() {
        let urgent = case_in_triage(Priority::Urgent, 0);
        let normal = case_in_triage(Priority::Normal, 0);
        let emergency = QueueFilter::new().priority(PriorityFilter::Emergency);
        assert!(emergency.matches(&urgent));
        assert!(!emergency.matches(&normal));
        let routine = QueueFilter::new().priority(PriorityFilter::Normal);
        assert!(routine.matches(&normal));
    }

    #[test]
    fn blank_text_filter_matches_everything() {
        let c = case_in_triage(Priority::Normal, 0);
        assert!(QueueFilter::new().text("   ").matches(&c));
        assert!(QueueFilter::new().text("mrn").matches(&c));
        assert!(!QueueFilter::new().text("nobody").matches(&c));
    }
}
