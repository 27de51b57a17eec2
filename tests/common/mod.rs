//! Shared harness for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use caseflow::clock::ManualClock;
use caseflow::engine::{Engine, EngineConfig, StageOutcome};
use caseflow::model::{Case, CaseId, NewCase, Priority, StageId, Worker};
use caseflow::registry::StageRegistry;
use caseflow::repository::InMemoryRepository;
use chrono::{DateTime, TimeZone, Utc};

pub struct Harness {
    pub engine: Arc<Engine>,
    pub repo: Arc<InMemoryRepository>,
    pub clock: Arc<ManualClock>,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
}

pub fn stage(id: &str) -> StageId {
    StageId::from(id)
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        wait_refresh: Duration::from_secs(60),
        collaborator_timeout: Duration::from_millis(500),
        delivery_max_attempts: 3,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let repo = Arc::new(InMemoryRepository::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = Engine::with_clock(
        StageRegistry::builtin(),
        repo.clone(),
        config,
        clock.clone(),
    );
    Harness {
        engine: Arc::new(engine),
        repo,
        clock,
    }
}

impl Harness {
    pub async fn register(&self, name: &str) -> CaseId {
        self.register_with(NewCase::new(name, format!("MRN-{name}")))
            .await
    }

    pub async fn register_with(&self, new: NewCase) -> CaseId {
        self.engine.register(new).await.unwrap().id
    }

    pub async fn register_priority(&self, name: &str, priority: Priority) -> CaseId {
        self.register_with(NewCase::new(name, format!("MRN-{name}")).priority(priority))
            .await
    }

    pub fn get(&self, id: CaseId) -> Case {
        self.engine.get(id).unwrap()
    }

    /// Start and complete `stage`.
    pub async fn run_stage(&self, id: CaseId, stage_id: &str) {
        let s = stage(stage_id);
        self.engine.start_stage(id, &s).await.unwrap();
        self.engine
            .complete_stage(id, &s, StageOutcome::new())
            .await
            .unwrap();
    }

    /// Registered case that has finished triage and is waiting in
    /// consultation.
    pub async fn in_consultation_queue(&self, name: &str) -> CaseId {
        let id = self.register(name).await;
        self.run_stage(id, StageId::TRIAGE).await;
        self.engine
            .move_to_stage(id, &stage(StageId::CONSULTATION))
            .await
            .unwrap();
        id
    }

    /// Case routed into the laboratory (status sent-to-lab), not started.
    pub async fn sent_to_lab(&self, name: &str) -> CaseId {
        let id = self.in_consultation_queue(name).await;
        self.run_stage(id, StageId::CONSULTATION).await;
        self.engine
            .move_to_stage(id, &stage(StageId::LABORATORY))
            .await
            .unwrap();
        id
    }

    /// Case routed into radiology, not started.
    pub async fn sent_to_radiology(&self, name: &str) -> CaseId {
        let id = self.in_consultation_queue(name).await;
        self.run_stage(id, StageId::CONSULTATION).await;
        self.engine
            .move_to_stage(id, &stage(StageId::RADIOLOGY))
            .await
            .unwrap();
        id
    }
}

pub fn worker(name: &str, stage_id: &str) -> Worker {
    Worker::new(name, stage_id)
}
