//! Sequential, resumable scan over the qualifying units of a page.
//!
//! The loop in [`run_scan`] owns its [`ScanState`] outright: the state is moved
//! into the spawned task and handed back when the task stops (paused, done,
//! cancelled or failed). Pause and cancel are observed only between steps, so
//! an in-flight count request always runs to completion.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::content::{Annotation, ContentSource, ContentUnit};
use crate::counter::RemoteCounter;
use crate::error::ScanError;
use crate::extract::SubjectExtractor;
use crate::matcher::Matcher;
use crate::progress::ProgressReporter;
use crate::types::{
    Progress, ScanPhase, ScanReport, ScanStatus, SearchParameters, StepOutcome, Tier, UnitRef,
};

pub const DEFAULT_PACING: Duration = Duration::from_millis(800);
pub const DEFAULT_HIGH_THRESHOLD: u64 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    /// Delay after every remote lookup; not applied to skipped units.
    pub pacing: Duration,
    /// Counts at or above this are classified high.
    pub high_threshold: u64,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            pacing: DEFAULT_PACING,
            high_threshold: DEFAULT_HIGH_THRESHOLD,
        }
    }
}

pub struct ScanState {
    pub units: Vec<Arc<dyn ContentUnit>>,
    /// Next unit to process.
    pub current_index: usize,
    pub phase: ScanPhase,
    pub checked: u64,
    pub high_count: u64,
    pub low_count: u64,
    pub outcomes: Vec<StepOutcome>,
}

impl ScanState {
    pub fn new(units: Vec<Arc<dyn ContentUnit>>) -> Self {
        Self {
            units,
            current_index: 0,
            phase: ScanPhase::Idle,
            checked: 0,
            high_count: 0,
            low_count: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.units.len() as u64
    }

    pub fn status(&self) -> ScanStatus {
        ScanStatus {
            running: self.phase == ScanPhase::Running,
            paused: self.phase == ScanPhase::Paused,
            phase: self.phase,
            current_index: self.current_index as u64,
            total: self.total(),
            checked: self.checked,
            high_count: self.high_count,
            low_count: self.low_count,
        }
    }

    pub fn progress(&self) -> Progress {
        self.status().progress()
    }

    fn record(&mut self, tier: Tier) -> Result<(), ScanError> {
        self.checked = self
            .checked
            .checked_add(1)
            .ok_or(ScanError::CounterOverflow { what: "checked" })?;
        let (slot, what) = match tier {
            Tier::High => (&mut self.high_count, "high_count"),
            Tier::Low => (&mut self.low_count, "low_count"),
        };
        *slot = slot
            .checked_add(1)
            .ok_or(ScanError::CounterOverflow { what })?;
        Ok(())
    }
}

/// Everything a scan needs besides its state.
#[derive(Clone)]
pub struct ScanDeps {
    pub counter: RemoteCounter,
    pub extractor: SubjectExtractor,
    pub matcher: Matcher,
    pub source: Arc<dyn ContentSource>,
    pub reporter: Arc<dyn ProgressReporter>,
    pub params: SearchParameters,
    pub settings: ScanSettings,
}

/// External triggers observed by a running loop.
pub struct ScanSignals {
    pub pause: watch::Receiver<bool>,
    pub cancel: CancellationToken,
    pub status: Arc<watch::Sender<ScanStatus>>,
}

enum Flow {
    Continue,
    Stop,
}

/// Process units from `state.current_index` until the worklist ends, a pause
/// or cancel is observed, or bookkeeping fails.
pub async fn run_scan(mut state: ScanState, deps: &ScanDeps, signals: &ScanSignals) -> ScanState {
    state.phase = ScanPhase::Running;
    signals.status.send_replace(state.status());

    loop {
        match step(&mut state, deps, signals).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Stop) => break,
            Err(e) => {
                error!(index = state.current_index, error = %e, "Scan aborted");
                state.phase = ScanPhase::Failed;
                break;
            }
        }
    }

    signals.status.send_replace(state.status());
    match state.phase {
        ScanPhase::Completed => {
            info!(
                checked = state.checked,
                high = state.high_count,
                low = state.low_count,
                total = state.total(),
                "Scan completed"
            );
            deliver(deps, &state.progress()).await;
        }
        phase => info!(?phase, index = state.current_index, "Scan stopped"),
    }
    state
}

async fn step(
    state: &mut ScanState,
    deps: &ScanDeps,
    signals: &ScanSignals,
) -> Result<Flow, ScanError> {
    if *signals.pause.borrow() {
        state.phase = ScanPhase::Paused;
        return Ok(Flow::Stop);
    }
    if signals.cancel.is_cancelled() {
        state.phase = ScanPhase::Cancelled;
        return Ok(Flow::Stop);
    }

    let index = state.current_index;
    let total = state.units.len();
    if index == total {
        state.phase = ScanPhase::Completed;
        return Ok(Flow::Stop);
    }
    let unit = state
        .units
        .get(index)
        .cloned()
        .ok_or(ScanError::IndexOutOfRange { index, total })?;

    let Some(subject) = deps
        .extractor
        .extract(unit.as_ref(), UnitRef(index))
        .into_iter()
        .next()
    else {
        debug!(index, "No subject in unit, skipping");
        state.outcomes.push(StepOutcome::Skipped { index });
        state.current_index = index + 1;
        emit(state, deps, signals).await;
        return Ok(Flow::Continue);
    };

    let resolved = deps.counter.resolve_count(&subject, &deps.params).await;

    // Paused while the request was in flight: leave the index on this unit so
    // resume re-reads it (from cache) instead of counting it twice.
    if *signals.pause.borrow() {
        info!(index, subject = %subject.id, "Pause observed after in-flight request");
        state.phase = ScanPhase::Paused;
        return Ok(Flow::Stop);
    }

    match resolved {
        Ok(result) => {
            let tier = Tier::classify(result.count, deps.settings.high_threshold);
            state.record(tier)?;
            unit.annotate(Annotation::Count {
                count: result.count,
                tier,
                url: result.source_url.clone(),
            });
            state.outcomes.push(StepOutcome::Checked {
                index,
                result,
                tier,
            });
        }
        Err(e) => {
            warn!(index, subject = %subject.id, error = %e, "Count unavailable, skipping");
            unit.annotate(Annotation::Unknown);
            state.outcomes.push(StepOutcome::Failed {
                index,
                subject_id: subject.id.clone(),
                reason: e.to_string(),
            });
        }
    }

    state.current_index = index + 1;
    emit(state, deps, signals).await;

    tokio::select! {
        _ = tokio::time::sleep(deps.settings.pacing) => {}
        _ = signals.cancel.cancelled() => {}
    }
    Ok(Flow::Continue)
}

async fn emit(state: &ScanState, deps: &ScanDeps, signals: &ScanSignals) {
    signals.status.send_replace(state.status());
    deliver(deps, &state.progress()).await;
}

async fn deliver(deps: &ScanDeps, progress: &Progress) {
    if let Err(e) = deps.reporter.report(progress).await {
        debug!(error = %e, "Progress delivery failed");
    }
}

#[derive(Default)]
struct RunSlot {
    task: Option<JoinHandle<ScanState>>,
    /// State of the last stopped run; a paused run resumes from here.
    parked: Option<ScanState>,
}

/// Start/pause/resume/cancel handle around [`run_scan`].
pub struct ScanController {
    deps: ScanDeps,
    pause_tx: watch::Sender<bool>,
    status_tx: Arc<watch::Sender<ScanStatus>>,
    cancel: std::sync::Mutex<CancellationToken>,
    run: Mutex<RunSlot>,
}

impl ScanController {
    pub fn new(deps: ScanDeps) -> Self {
        let (pause_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(ScanStatus::default());
        Self {
            deps,
            pause_tx,
            status_tx: Arc::new(status_tx),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            run: Mutex::new(RunSlot::default()),
        }
    }

    pub fn status(&self) -> ScanStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.status_tx.subscribe()
    }

    /// No-op while running; continues a paused run; otherwise starts over
    /// from a fresh snapshot of the page.
    pub async fn start(&self) -> Result<ScanStatus> {
        let mut slot = self.run.lock().await;
        self.reap(&mut slot).await;

        if slot.task.is_some() {
            debug!("Scan already running");
            return Ok(self.status());
        }
        if let Some(state) = take_paused(&mut slot) {
            info!(index = state.current_index, "Continuing paused scan");
            self.spawn(&mut slot, state);
            return Ok(self.status());
        }

        let units = self.deps.source.units()?;
        let seen = units.len();
        let worklist: Vec<_> = units
            .into_iter()
            .filter(|u| self.deps.matcher.matches(u.as_ref()))
            .collect();
        info!(units = seen, worklist = worklist.len(), "Starting new scan");

        slot.parked = None;
        self.spawn(&mut slot, ScanState::new(worklist));
        Ok(self.status())
    }

    /// Takes effect at the next step boundary.
    pub fn pause(&self) -> ScanStatus {
        self.pause_tx.send_replace(true);
        self.status()
    }

    pub async fn resume(&self) -> ScanStatus {
        let mut slot = self.run.lock().await;
        self.reap(&mut slot).await;

        // The loop already published Paused but its task is still winding down.
        if self.status().paused {
            if let Some(task) = slot.task.take() {
                let joined = task.await;
                self.park(&mut slot, joined);
            }
        }

        if slot.task.is_some() {
            // A pause not yet observed by the loop is simply withdrawn.
            self.pause_tx.send_replace(false);
        } else if let Some(state) = take_paused(&mut slot) {
            info!(index = state.current_index, "Resuming scan");
            self.spawn(&mut slot, state);
        }
        self.status()
    }

    pub async fn cancel(&self) -> ScanStatus {
        if let Ok(token) = self.cancel.lock() {
            token.cancel();
        }
        let mut slot = self.run.lock().await;
        self.reap(&mut slot).await;
        if let Some(state) = slot.parked.as_mut() {
            if state.phase == ScanPhase::Paused {
                state.phase = ScanPhase::Cancelled;
                self.status_tx.send_replace(state.status());
            }
        }
        self.status()
    }

    /// Wait for the current run to stop and return its final status.
    pub async fn wait(&self) -> ScanStatus {
        let mut slot = self.run.lock().await;
        // Awaited in place so a dropped `wait` leaves the task in the slot.
        if let Some(task) = slot.task.as_mut() {
            let joined = task.await;
            slot.task = None;
            self.park(&mut slot, joined);
        }
        self.status()
    }

    /// Status plus per-step outcomes of the last stopped run.
    pub async fn report(&self) -> Option<ScanReport> {
        let mut slot = self.run.lock().await;
        self.reap(&mut slot).await;
        slot.parked.as_ref().map(|state| ScanReport {
            status: state.status(),
            outcomes: state.outcomes.clone(),
        })
    }

    fn spawn(&self, slot: &mut RunSlot, mut state: ScanState) {
        self.pause_tx.send_replace(false);
        let cancel = CancellationToken::new();
        if let Ok(mut current) = self.cancel.lock() {
            *current = cancel.clone();
        }

        state.phase = ScanPhase::Running;
        self.status_tx.send_replace(state.status());

        let deps = self.deps.clone();
        let signals = ScanSignals {
            pause: self.pause_tx.subscribe(),
            cancel,
            status: self.status_tx.clone(),
        };
        slot.task = Some(tokio::spawn(async move {
            run_scan(state, &deps, &signals).await
        }));
    }

    async fn reap(&self, slot: &mut RunSlot) {
        if slot.task.as_ref().is_some_and(|t| t.is_finished()) {
            if let Some(task) = slot.task.take() {
                self.park(slot, task.await);
            }
        }
    }

    fn park(&self, slot: &mut RunSlot, joined: Result<ScanState, tokio::task::JoinError>) {
        match joined {
            Ok(state) => slot.parked = Some(state),
            Err(e) => {
                // The loop's state is lost with the task; keep the last
                // published aggregates.
                error!(error = %e, "Scan task crashed");
                let mut status = self.status();
                status.phase = ScanPhase::Failed;
                status.running = false;
                status.paused = false;
                self.status_tx.send_replace(status);
                slot.parked = None;
            }
        }
    }
}

fn take_paused(slot: &mut RunSlot) -> Option<ScanState> {
    match slot.parked.as_ref() {
        Some(state) if state.phase == ScanPhase::Paused => slot.parked.take(),
        _ => None,
    }
}
