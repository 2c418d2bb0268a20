mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Semaphore};
use tokio_util::sync::CancellationToken;

use ad_scan_rs::content::{Annotation, Clickable, ContentUnit};
use ad_scan_rs::progress::ChannelReporter;
use ad_scan_rs::scanner::{run_scan, ScanController, ScanSignals, ScanState};
use ad_scan_rs::types::{ScanPhase, ScanStatus, StepOutcome, Tier};

use common::*;

#[tokio::test(start_paused = true)]
async fn classifies_high_and_low_and_skips_empty_units() {
    let (cards, service) = abc();
    let reporter = Arc::new(RecordingReporter::default());
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        reporter.clone(),
    ));

    controller.start().await.unwrap();
    let status = controller.wait().await;

    assert_eq!(status.phase, ScanPhase::Completed);
    assert!(!status.running && !status.paused);
    assert_eq!(
        (status.checked, status.high_count, status.low_count, status.total),
        (2, 1, 1, 3)
    );
    assert_eq!(service.calls(), vec!["storea", "storec"]);

    // One emission per unit plus the completion emission.
    let seen = reporter.seen();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[1].checked, 1, "skipped unit leaves checked unchanged");
    assert_eq!(seen[3], status.progress());

    assert!(matches!(
        cards[0].annotation(),
        Some(Annotation::Count { count: 30, tier: Tier::High, .. })
    ));
    assert_eq!(cards[1].annotation(), None);
    assert!(matches!(
        cards[2].annotation(),
        Some(Annotation::Count { count: 5, tier: Tier::Low, .. })
    ));

    let report = controller.report().await.unwrap();
    assert!(matches!(report.outcomes[1], StepOutcome::Skipped { index: 1 }));
}

#[tokio::test(start_paused = true)]
async fn pause_after_first_subject_resumes_at_next_index() {
    let (cards, service) = abc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        Arc::new(ChannelReporter::new(tx)),
    ));

    controller.start().await.unwrap();
    let first = rx.recv().await.unwrap();
    assert_eq!(first.checked, 1);
    controller.pause();

    let status = controller.wait().await;
    assert!(status.paused);
    assert_eq!(status.phase, ScanPhase::Paused);
    assert_eq!((status.current_index, status.checked), (1, 1));
    assert_eq!(service.calls(), vec!["storea"]);

    let resumed = controller.resume().await;
    assert!(resumed.running);
    let status = controller.wait().await;
    assert_eq!(status.phase, ScanPhase::Completed);
    assert_eq!(status.checked, 2);
    assert_eq!(service.calls(), vec!["storea", "storec"]);

    let indices: Vec<usize> = controller
        .report()
        .await
        .unwrap()
        .outcomes
        .iter()
        .map(StepOutcome::index)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn pause_during_request_keeps_index_on_that_unit() {
    let gate = Arc::new(Semaphore::new(0));
    let service = Arc::new(
        ScriptedService::new()
            .body("storea", "30 results")
            .body("storec", "5 results")
            .gated(gate.clone()),
    );
    let cards = vec![ad_card(Some("/storea")), ad_card(Some("/storec"))];
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        quiet(),
    ));

    controller.start().await.unwrap();
    service.entered.notified().await;
    controller.pause();
    gate.add_permits(1);

    let status = controller.wait().await;
    assert_eq!(status.phase, ScanPhase::Paused);
    assert_eq!((status.current_index, status.checked), (0, 0));

    gate.add_permits(10);
    controller.resume().await;
    let status = controller.wait().await;
    assert_eq!(status.phase, ScanPhase::Completed);
    assert_eq!(
        (status.checked, status.high_count, status.low_count),
        (2, 1, 1)
    );
    // The interrupted lookup was cached, so resume did not fetch it again.
    assert_eq!(service.calls(), vec!["storea", "storec"]);
}

#[tokio::test(start_paused = true)]
async fn failed_lookup_is_skipped_and_marked_unknown() {
    let cards = vec![ad_card(Some("/brokenstore")), ad_card(Some("/storec"))];
    let service = Arc::new(
        ScriptedService::new()
            .status("brokenstore", 500)
            .body("storec", "0 results"),
    );
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service,
        quiet(),
    ));

    controller.start().await.unwrap();
    let status = controller.wait().await;

    assert_eq!(status.phase, ScanPhase::Completed);
    assert_eq!(
        (status.checked, status.high_count, status.low_count),
        (1, 0, 1)
    );
    assert_eq!(cards[0].annotation(), Some(Annotation::Unknown));
    assert!(matches!(
        cards[1].annotation(),
        Some(Annotation::Count { count: 0, .. })
    ));

    let report = controller.report().await.unwrap();
    match &report.outcomes[0] {
        StepOutcome::Failed {
            subject_id, reason, ..
        } => {
            assert_eq!(subject_id, "brokenstore");
            assert!(reason.contains("500"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn pacing_follows_lookups_but_not_skips() {
    let (cards, service) = abc();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service,
        quiet(),
    ));

    let started = tokio::time::Instant::now();
    controller.start().await.unwrap();
    controller.wait().await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(1600), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2400), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn start_while_running_is_a_no_op() {
    let (cards, service) = abc();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        quiet(),
    ));

    controller.start().await.unwrap();
    let again = controller.start().await.unwrap();
    assert!(again.running);

    let status = controller.wait().await;
    assert_eq!(status.checked, 2);
    assert_eq!(service.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn start_after_completion_resets_counters() {
    let (cards, service) = abc();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        quiet(),
    ));

    controller.start().await.unwrap();
    controller.wait().await;

    let fresh = controller.start().await.unwrap();
    assert_eq!((fresh.checked, fresh.current_index), (0, 0));
    let status = controller.wait().await;
    assert_eq!(
        (status.checked, status.high_count, status.low_count),
        (2, 1, 1)
    );
    // Second run is served from the cache.
    assert_eq!(service.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancel_keeps_partial_aggregates() {
    let (cards, service) = abc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        Arc::new(ChannelReporter::new(tx)),
    ));

    controller.start().await.unwrap();
    rx.recv().await.unwrap();
    controller.cancel().await;

    let status = controller.wait().await;
    assert_eq!(status.phase, ScanPhase::Cancelled);
    assert_eq!((status.checked, status.current_index), (1, 1));
    assert_eq!(service.calls(), vec!["storea"]);
}

#[tokio::test(start_paused = true)]
async fn progress_delivery_failures_do_not_affect_the_scan() {
    let (cards, service) = abc();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service,
        Arc::new(FailingReporter),
    ));

    controller.start().await.unwrap();
    let status = controller.wait().await;

    assert_eq!(status.phase, ScanPhase::Completed);
    assert_eq!(
        (status.checked, status.high_count, status.low_count),
        (2, 1, 1)
    );
    assert!(matches!(
        cards[2].annotation(),
        Some(Annotation::Count { count: 5, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn cancel_cuts_the_pacing_delay_short() {
    let (cards, service) = abc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service,
        Arc::new(ChannelReporter::new(tx)),
    ));

    controller.start().await.unwrap();
    rx.recv().await.unwrap();
    let sleeping = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.cancel().await;

    let status = controller.wait().await;
    let elapsed = sleeping.elapsed();
    assert_eq!(status.phase, ScanPhase::Cancelled);
    assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn pause_waits_out_the_pacing_delay() {
    let (cards, service) = abc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        Arc::new(ChannelReporter::new(tx)),
    ));

    controller.start().await.unwrap();
    rx.recv().await.unwrap();
    let sleeping = tokio::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    controller.pause();

    let status = controller.wait().await;
    let elapsed = sleeping.elapsed();
    assert_eq!(status.phase, ScanPhase::Paused);
    assert_eq!(status.current_index, 1);
    assert!(elapsed >= Duration::from_millis(800), "{elapsed:?}");
    assert_eq!(service.calls(), vec!["storea"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_right_after_observed_pause_continues_the_run() {
    for _ in 0..100 {
        let (cards, service) = abc();
        let mut deps = deps(Arc::new(StaticSource(units(&cards))), service, quiet());
        deps.settings.pacing = Duration::ZERO;
        let controller = ScanController::new(deps);
        let mut status_rx = controller.subscribe();

        controller.start().await.unwrap();
        controller.pause();
        status_rx.wait_for(|s| s.paused).await.unwrap();
        controller.resume().await;

        let status = controller.wait().await;
        assert_eq!(status.phase, ScanPhase::Completed);
        assert_eq!(status.checked, 2);
    }
}

#[tokio::test(start_paused = true)]
async fn cancel_while_paused_then_start_begins_again() {
    let (cards, service) = abc();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service,
        Arc::new(ChannelReporter::new(tx)),
    ));

    controller.start().await.unwrap();
    rx.recv().await.unwrap();
    controller.pause();
    controller.wait().await;

    let status = controller.cancel().await;
    assert_eq!(status.phase, ScanPhase::Cancelled);
    assert_eq!(controller.resume().await.phase, ScanPhase::Cancelled);

    let fresh = controller.start().await.unwrap();
    assert_eq!(fresh.current_index, 0);
    let status = controller.wait().await;
    assert_eq!(status.phase, ScanPhase::Completed);
    assert_eq!(status.checked, 2);
}

#[tokio::test(start_paused = true)]
async fn resume_when_not_paused_is_a_no_op() {
    let (cards, service) = abc();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        quiet(),
    ));

    assert_eq!(controller.resume().await.phase, ScanPhase::Idle);

    controller.start().await.unwrap();
    controller.wait().await;
    let status = controller.resume().await;
    assert_eq!(status.phase, ScanPhase::Completed);
    assert_eq!(service.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn units_without_markers_are_left_out() {
    let plain = Arc::new(
        ad_scan_rs::content::CardSnapshot::new("organic post")
            .with_clickable(Clickable::text("Like"))
            .with_link("/someone"),
    );
    let mut cards = vec![plain];
    cards.extend(abc().0);
    let (_, service) = abc();
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        quiet(),
    ));

    let started = controller.start().await.unwrap();
    assert_eq!(started.total, 3);
    controller.wait().await;
    assert!(!service.calls().contains(&"someone".to_string()));
}

#[tokio::test(start_paused = true)]
async fn bookkeeping_violation_fails_and_keeps_aggregates() {
    let (cards, service) = abc();
    let deps = deps(
        Arc::new(StaticSource(units(&cards))),
        service.clone(),
        quiet(),
    );
    let mut state = ScanState::new(units(&cards));
    state.current_index = 7;
    state.checked = 2;
    state.high_count = 2;

    let (_pause_tx, pause) = watch::channel(false);
    let (status_tx, status_rx) = watch::channel(ScanStatus::default());
    let signals = ScanSignals {
        pause,
        cancel: CancellationToken::new(),
        status: Arc::new(status_tx),
    };

    let state = run_scan(state, &deps, &signals).await;
    assert_eq!(state.phase, ScanPhase::Failed);
    assert_eq!((state.checked, state.high_count), (2, 2));
    assert_eq!(status_rx.borrow().phase, ScanPhase::Failed);
    assert!(service.calls().is_empty());
}

struct VanishingUnit;

impl ContentUnit for VanishingUnit {
    fn clickables(&self) -> Vec<Clickable> {
        vec![Clickable::text("See ad details")]
    }

    fn links(&self) -> Vec<String> {
        panic!("element detached from page")
    }

    fn text(&self) -> String {
        String::new()
    }

    fn annotate(&self, _: Annotation) {}
}

#[tokio::test(start_paused = true)]
async fn crashed_loop_reports_failed_with_last_aggregates() {
    let (cards, service) = abc();
    let mut worklist = units(&cards[..1]);
    worklist.push(Arc::new(VanishingUnit));
    let controller = ScanController::new(deps(
        Arc::new(StaticSource(worklist)),
        service,
        quiet(),
    ));

    controller.start().await.unwrap();
    let status = controller.wait().await;

    assert_eq!(status.phase, ScanPhase::Failed);
    assert!(!status.running);
    assert_eq!((status.checked, status.high_count), (1, 1));
    assert!(controller.report().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn start_surfaces_source_errors() {
    let controller = ScanController::new(deps(
        Arc::new(BrokenSource),
        Arc::new(ScriptedService::new()),
        quiet(),
    ));
    assert!(controller.start().await.is_err());
    assert_eq!(controller.status().phase, ScanPhase::Idle);
}
