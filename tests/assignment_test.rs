//! Integration tests for worker assignment and release.

mod common;

use caseflow::error::Error;
use caseflow::model::*;
use caseflow::queue::QueueFilter;
use common::{harness, stage, worker};

fn assigned_count(h: &common::Harness, id: CaseId) -> usize {
    h.engine
        .notifications()
        .for_case(id)
        .iter()
        .filter(|n| matches!(n.kind, NotificationKind::CaseAssigned { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Assign
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_worker_is_told_who_holds_the_case() {
    let h = harness();
    let id = h.register("Ada").await;
    let nurse_a = worker("nurseA", StageId::TRIAGE);
    let nurse_b = worker("nurseB", StageId::TRIAGE);

    let case = h.engine.assign(id, &nurse_a).await.unwrap();
    let held = case.assignment.unwrap();
    assert_eq!(held.worker, WorkerId::from("nurseA"));
    assert_eq!(held.stage, stage(StageId::TRIAGE));

    let err = h.engine.assign(id, &nurse_b).await.unwrap_err();
    match err {
        Error::AlreadyAssigned { case, holder } => {
            assert_eq!(case, id);
            assert_eq!(holder, WorkerId::from("nurseA"));
        }
        other => panic!("expected AlreadyAssigned, got {other}"),
    }
    assert_eq!(
        h.get(id).assigned_worker(),
        Some(&WorkerId::from("nurseA"))
    );
}

#[tokio::test]
async fn assigning_the_holder_again_is_a_no_op() {
    let h = harness();
    let id = h.register("Ben").await;
    let nurse = worker("nurseA", StageId::TRIAGE);

    h.engine.assign(id, &nurse).await.unwrap();
    let first = h.get(id);
    h.engine.assign(id, &nurse).await.unwrap();

    assert_eq!(h.get(id), first);
    assert_eq!(assigned_count(&h, id), 1);
}

#[tokio::test]
async fn worker_from_another_stage_is_refused() {
    let h = harness();
    let id = h.register("Cy").await;

    let err = h
        .engine
        .assign(id, &worker("dr-a", StageId::CONSULTATION))
        .await
        .unwrap_err();
    match err {
        Error::StageMismatch {
            worker_stage,
            case_stage,
            ..
        } => {
            assert_eq!(worker_stage, stage(StageId::CONSULTATION));
            assert_eq!(case_stage, Some(stage(StageId::TRIAGE)));
        }
        other => panic!("expected StageMismatch, got {other}"),
    }
    assert!(h.get(id).assignment.is_none());
}

#[tokio::test]
async fn unknown_worker_stage_is_reported() {
    let h = harness();
    let id = h.register("Dee").await;
    let err = h
        .engine
        .assign(id, &worker("x", "dentistry"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownStage(_)));
}

#[tokio::test]
async fn discharged_case_cannot_be_assigned() {
    let h = harness();
    let id = h.in_consultation_queue("Eve").await;
    h.run_stage(id, StageId::CONSULTATION).await;
    h.engine.discharge(id).await.unwrap();

    let err = h
        .engine
        .assign(id, &worker("dr-a", StageId::CONSULTATION))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

#[tokio::test]
async fn assignment_survives_start_and_complete() {
    let h = harness();
    let id = h.in_consultation_queue("Fay").await;
    h.engine
        .assign(id, &worker("dr-a", StageId::CONSULTATION))
        .await
        .unwrap();
    h.run_stage(id, StageId::CONSULTATION).await;
    assert_eq!(h.get(id).assigned_worker(), Some(&WorkerId::from("dr-a")));
}

// ---------------------------------------------------------------------------
// Release
// ---------------------------------------------------------------------------

#[tokio::test]
async fn release_returns_case_to_the_pool() {
    let h = harness();
    let id = h.in_consultation_queue("Gus").await;
    let doctor = worker("dr-a", StageId::CONSULTATION);
    h.engine.assign(id, &doctor).await.unwrap();
    h.engine
        .start_stage(id, &stage(StageId::CONSULTATION))
        .await
        .unwrap();

    let case = h.engine.release(id).await.unwrap();
    assert!(case.assignment.is_none());
    // Releasing does not undo the stage entry.
    assert_eq!(case.status, Status::InConsultation);

    // Someone else may now pick it up.
    h.engine
        .assign(id, &worker("dr-b", StageId::CONSULTATION))
        .await
        .unwrap();
}

#[tokio::test]
async fn release_after_completion_is_refused() {
    let h = harness();
    let id = h.register("Hal").await;
    h.engine
        .assign(id, &worker("nurseA", StageId::TRIAGE))
        .await
        .unwrap();
    h.run_stage(id, StageId::TRIAGE).await;

    let err = h.engine.release(id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::CannotReleaseCompleted { ref stage, .. } if stage.as_str() == StageId::TRIAGE
    ));
    assert!(h.get(id).assignment.is_some());
}

#[tokio::test]
async fn release_after_discharge_is_refused() {
    let h = harness();
    let id = h.in_consultation_queue("Ida").await;
    h.engine
        .assign(id, &worker("dr-a", StageId::CONSULTATION))
        .await
        .unwrap();
    h.run_stage(id, StageId::CONSULTATION).await;
    h.engine.discharge(id).await.unwrap();

    let err = h.engine.release(id).await.unwrap_err();
    assert!(matches!(err, Error::CannotReleaseCompleted { .. }));
}

#[tokio::test]
async fn release_after_the_case_moved_on_is_refused() {
    let h = harness();
    let id = h.register("Jo").await;
    // Claimed while waiting for triage, then taken straight into
    // consultation by someone else.
    h.engine
        .assign(id, &worker("nurseA", StageId::TRIAGE))
        .await
        .unwrap();
    h.engine
        .start_stage(id, &stage(StageId::CONSULTATION))
        .await
        .unwrap();

    let err = h.engine.release(id).await.unwrap_err();
    match err {
        Error::CannotReleaseMoved { assigned_stage, .. } => {
            assert_eq!(assigned_stage, stage(StageId::TRIAGE));
        }
        other => panic!("expected CannotReleaseMoved, got {other}"),
    }
}

#[tokio::test]
async fn release_of_unassigned_case_is_invalid() {
    let h = harness();
    let id = h.register("Kai").await;
    let err = h.engine.release(id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assign_and_release_are_announced_to_the_stage() {
    let h = harness();
    let id = h.register("Lu").await;
    h.engine
        .assign(id, &worker("nurseA", StageId::TRIAGE))
        .await
        .unwrap();
    h.engine.release(id).await.unwrap();

    let kinds: Vec<_> = h
        .engine
        .notifications()
        .for_stage(&stage(StageId::TRIAGE))
        .into_iter()
        .filter(|n| n.case_id == id)
        .map(|n| n.kind.name())
        .collect();
    assert_eq!(kinds, vec!["case_registered", "case_assigned", "case_released"]);
}

#[tokio::test]
async fn assignment_moves_case_between_queue_partitions() {
    let h = harness();
    let id = h.register("Mo").await;
    let triage = stage(StageId::TRIAGE);
    let nurse_a = WorkerId::from("nurseA");
    let nurse_b = WorkerId::from("nurseB");

    let view = h
        .engine
        .queues(&triage, &nurse_a, &QueueFilter::new())
        .unwrap();
    assert_eq!(view.unassigned.len(), 1);

    h.engine
        .assign(id, &worker("nurseA", StageId::TRIAGE))
        .await
        .unwrap();

    let mine = h
        .engine
        .queues(&triage, &nurse_a, &QueueFilter::new())
        .unwrap();
    assert!(mine.unassigned.is_empty());
    assert_eq!(mine.mine.len(), 1);

    // Another nurse no longer sees it as available.
    let theirs = h
        .engine
        .queues(&triage, &nurse_b, &QueueFilter::new())
        .unwrap();
    assert!(theirs.unassigned.is_empty());
    assert!(theirs.mine.is_empty());
}
