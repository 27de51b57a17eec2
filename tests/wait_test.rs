//! Integration tests for wait-time tracking.

mod common;

use caseflow::model::*;
use caseflow::wait::WaitBand;
use chrono::Duration;
use common::{harness, stage, t0};

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unrouted_case_waits_from_registration() {
    let h = harness();
    let id = h.register("Ada").await;
    h.clock.advance_minutes(12);

    let wait = h.engine.wait_time(id).unwrap().unwrap();
    assert_eq!(wait.stage, stage(StageId::TRIAGE));
    assert_eq!(wait.anchor, t0());
    assert_eq!(wait.minutes(), 12);
    assert_eq!(wait.band, WaitBand::Elevated);
}

#[tokio::test]
async fn started_case_waits_from_entry() {
    let h = harness();
    let id = h.register("Ben").await;
    h.clock.advance_minutes(5);
    h.engine
        .start_stage(id, &stage(StageId::TRIAGE))
        .await
        .unwrap();
    h.clock.advance_minutes(3);

    let wait = h.engine.wait_time(id).unwrap().unwrap();
    assert_eq!(wait.anchor, t0() + Duration::minutes(5));
    assert_eq!(wait.minutes(), 3);
}

#[tokio::test]
async fn moved_case_waits_from_arrival() {
    let h = harness();
    let id = h.register("Cy").await;
    h.run_stage(id, StageId::TRIAGE).await;
    h.clock.advance_minutes(10);
    h.engine
        .move_to_stage(id, &stage(StageId::CONSULTATION))
        .await
        .unwrap();
    h.clock.advance_minutes(15);

    let wait = h.engine.wait_time(id).unwrap().unwrap();
    assert_eq!(wait.stage, stage(StageId::CONSULTATION));
    assert_eq!(wait.anchor, t0() + Duration::minutes(10));
    assert_eq!(wait.minutes(), 15);
}

// ---------------------------------------------------------------------------
// Bands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bands_follow_the_clock() {
    let h = harness();
    let id = h.register("Dee").await;

    let mut seen = Vec::new();
    for minutes in [9, 10, 20, 30] {
        h.clock.set(t0() + Duration::minutes(minutes));
        seen.push(h.engine.wait_time(id).unwrap().unwrap().band);
    }
    assert_eq!(
        seen,
        vec![
            WaitBand::Normal,
            WaitBand::Elevated,
            WaitBand::High,
            WaitBand::Severe
        ]
    );
}

// ---------------------------------------------------------------------------
// Clock skew
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wait_is_never_negative() {
    let h = harness();
    let id = h.register("Eve").await;
    h.clock.set(t0() - Duration::minutes(5));

    let wait = h.engine.wait_time(id).unwrap().unwrap();
    assert_eq!(wait.waited, Duration::zero());
    assert_eq!(wait.band, WaitBand::Normal);
}

#[tokio::test]
async fn wait_never_shrinks_while_in_the_same_stage() {
    let h = harness();
    let id = h.register("Fay").await;

    h.clock.advance_minutes(15);
    assert_eq!(h.engine.wait_time(id).unwrap().unwrap().minutes(), 15);

    // Clock steps backwards.
    h.clock.set(t0() + Duration::minutes(5));
    assert_eq!(h.engine.wait_time(id).unwrap().unwrap().minutes(), 15);

    h.clock.set(t0() + Duration::minutes(20));
    assert_eq!(h.engine.wait_time(id).unwrap().unwrap().minutes(), 20);
}

#[tokio::test]
async fn new_anchor_starts_the_count_over() {
    let h = harness();
    let id = h.register("Gus").await;
    h.clock.advance_minutes(25);
    assert_eq!(h.engine.wait_time(id).unwrap().unwrap().minutes(), 25);

    // Entering triage moves the anchor to the entry time.
    h.engine
        .start_stage(id, &stage(StageId::TRIAGE))
        .await
        .unwrap();
    h.clock.advance_minutes(2);
    let wait = h.engine.wait_time(id).unwrap().unwrap();
    assert_eq!(wait.minutes(), 2);
    assert_eq!(wait.band, WaitBand::Normal);
}

// ---------------------------------------------------------------------------
// Periodic recomputation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recompute_covers_active_cases_only() {
    let h = harness();
    let waiting = h.register("Hal").await;
    let done = h.in_consultation_queue("Ida").await;
    h.run_stage(done, StageId::CONSULTATION).await;
    h.engine.discharge(done).await.unwrap();

    let waits = h.engine.recompute_wait_times();
    let ids: Vec<_> = waits.iter().map(|w| w.case_id).collect();
    assert_eq!(ids, vec![waiting]);
    assert!(h.engine.wait_time(done).unwrap().is_none());
    assert!(h.engine.last_wait_time(waiting).is_some());
    assert!(h.engine.last_wait_time(done).is_none());
}

#[tokio::test]
async fn stage_wait_times_longest_first() {
    let h = harness();
    let oldest = h.register("Jo").await;
    h.clock.advance_minutes(4);
    let middle = h.register("Kai").await;
    h.clock.advance_minutes(4);
    let newest = h.register("Lu").await;
    h.clock.advance_minutes(4);

    let report = h.engine.tick().await;
    assert_eq!(report.waits, 3);

    assert_eq!(h.engine.last_wait_time(oldest).unwrap().minutes(), 12);
    let waits = h.engine.stage_wait_times(&stage(StageId::TRIAGE));
    let ids: Vec<_> = waits.iter().map(|w| w.case_id).collect();
    assert_eq!(ids, vec![oldest, middle, newest]);
    let minutes: Vec<_> = waits.iter().map(|w| w.minutes()).collect();
    assert_eq!(minutes, vec![12, 8, 4]);

    assert!(h
        .engine
        .stage_wait_times(&stage(StageId::CONSULTATION))
        .is_empty());
}
