//! # Progress Module
//!
//! Run state machine, per-stage counters, throttled progress events and
//! cooperative cancellation.
//!
//! ```text
//! Idle → Running → (Cancelling → Cancelled) | Completed | Failed | Paused
//! ```
//!
//! Counters are atomics so every worker can update them through a shared
//! reference. Progress events go out at most once per configured interval.

mod cancel;
mod eta;

pub use cancel::CancellationToken;
pub use eta::ThroughputWindow;

use crate::events::{Event, EventSender, ProgressEvent, RunEvent, Stage};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lifecycle of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Cancelling,
    Cancelled,
    Completed,
    Failed,
    /// Stopped early with the manifest flushed; safe to run again
    Paused,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Cancelled | RunState::Completed | RunState::Failed | RunState::Paused
        )
    }

    fn can_become(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Idle, Failed)
                | (Running, Cancelling)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Cancelling, Cancelled)
                | (Cancelling, Failed)
                | (Cancelling, Paused)
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Cancelling => "cancelling",
            RunState::Cancelled => "cancelled",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Paused => "paused",
        };
        write!(f, "{}", name)
    }
}

#[derive(Default)]
struct StageCounters {
    files_done: AtomicUsize,
    files_total: AtomicUsize,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
}

/// Aggregates progress from every stage and owns the cancel signal
pub struct ProgressController {
    state: Mutex<RunState>,
    cancel: CancellationToken,
    started: Mutex<Option<Instant>>,
    counters: Vec<StageCounters>,
    windows: Vec<Mutex<ThroughputWindow>>,
    last_emit: Mutex<Option<Instant>>,
    interval: Duration,
    events: EventSender,
}

impl ProgressController {
    pub fn new(
        cancel: CancellationToken,
        events: EventSender,
        interval: Duration,
        eta_window: usize,
    ) -> Self {
        Self {
            state: Mutex::new(RunState::Idle),
            cancel,
            started: Mutex::new(None),
            counters: Stage::ALL.iter().map(|_| StageCounters::default()).collect(),
            windows: Stage::ALL
                .iter()
                .map(|_| Mutex::new(ThroughputWindow::new(eta_window)))
                .collect(),
            last_emit: Mutex::new(None),
            interval,
            events,
        }
    }

    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Failed)
    }

    /// Move to `next` if the state machine allows it
    pub fn transition(&self, next: RunState) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if !state.can_become(next) {
            return false;
        }
        *state = next;
        drop(state);

        tracing::debug!(state = %next, "run state changed");
        self.events
            .send(Event::Run(RunEvent::StateChanged { state: next }));
        true
    }

    /// Idle → Running, starting the clock
    pub fn start(&self) -> bool {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.transition(RunState::Running)
    }

    pub fn elapsed(&self) -> Duration {
        self.started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed())
            .unwrap_or_default()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cancellation. Safe to call repeatedly and from any thread.
    pub fn request_cancel(&self) {
        self.cancel.cancel();
        self.transition(RunState::Cancelling);
    }

    /// Polled between work items by every stage loop
    pub fn should_stop(&self) -> bool {
        if self.cancel.is_cancelled() {
            self.transition(RunState::Cancelling);
            return true;
        }
        false
    }

    fn counters(&self, stage: Stage) -> &StageCounters {
        &self.counters[stage.index()]
    }

    /// Grow the known workload of a stage
    pub fn add_total(&self, stage: Stage, files: usize, bytes: u64) {
        let counters = self.counters(stage);
        counters.files_total.fetch_add(files, Ordering::Relaxed);
        counters.bytes_total.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one finished item and maybe emit a progress event
    pub fn complete_item(&self, stage: Stage, bytes: u64) {
        let counters = self.counters(stage);
        let done = counters.files_done.fetch_add(1, Ordering::Relaxed) + 1;
        counters.bytes_done.fetch_add(bytes, Ordering::Relaxed);

        if let Ok(mut window) = self.windows[stage.index()].lock() {
            window.record(Instant::now(), done as u64);
        }

        self.maybe_emit(stage);
    }

    /// Account for a whole batch at once (single-threaded stages)
    pub fn complete_batch(&self, stage: Stage, files: usize, bytes: u64) {
        self.add_total(stage, files, bytes);
        let counters = self.counters(stage);
        counters.files_done.fetch_add(files, Ordering::Relaxed);
        counters.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.emit_now(stage);
    }

    pub fn files_done(&self, stage: Stage) -> usize {
        self.counters(stage).files_done.load(Ordering::Relaxed)
    }

    pub fn bytes_done(&self, stage: Stage) -> u64 {
        self.counters(stage).bytes_done.load(Ordering::Relaxed)
    }

    /// Current progress of a stage
    pub fn snapshot(&self, stage: Stage) -> ProgressEvent {
        let counters = self.counters(stage);
        let files_done = counters.files_done.load(Ordering::Relaxed);
        let files_total = counters.files_total.load(Ordering::Relaxed).max(files_done);
        let bytes_done = counters.bytes_done.load(Ordering::Relaxed);
        let bytes_total = counters.bytes_total.load(Ordering::Relaxed).max(bytes_done);

        let percent_complete = if files_total == 0 {
            0.0
        } else {
            (files_done as f64 / files_total as f64 * 100.0).min(100.0)
        };

        let remaining = (files_total - files_done) as u64;
        let eta_seconds = self.windows[stage.index()]
            .lock()
            .ok()
            .and_then(|w| w.eta_seconds(remaining));

        ProgressEvent {
            stage,
            files_done,
            files_total,
            bytes_done,
            bytes_total,
            percent_complete,
            eta_seconds,
        }
    }

    /// Emit a snapshot if the throttle interval has passed
    pub fn maybe_emit(&self, stage: Stage) {
        let now = Instant::now();
        {
            let Ok(mut last) = self.last_emit.try_lock() else {
                return;
            };
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.interval {
                    return;
                }
            }
            *last = Some(now);
        }
        self.events.send(Event::Progress(self.snapshot(stage)));
    }

    /// Emit a snapshot regardless of the throttle (stage boundaries)
    pub fn emit_now(&self, stage: Stage) {
        if let Ok(mut last) = self.last_emit.lock() {
            *last = Some(Instant::now());
        }
        self.events.send(Event::Progress(self.snapshot(stage)));
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{null_sender, EventChannel};

    fn controller(interval: Duration) -> ProgressController {
        ProgressController::new(CancellationToken::new(), null_sender(), interval, 16)
    }

    #[test]
    fn happy_path_transitions() {
        let progress = controller(Duration::ZERO);
        assert_eq!(progress.state(), RunState::Idle);
        assert!(progress.start());
        assert!(progress.transition(RunState::Completed));
        assert!(progress.state().is_terminal());
    }

    #[test]
    fn cancel_goes_through_cancelling() {
        let progress = controller(Duration::ZERO);
        progress.start();
        progress.request_cancel();
        progress.request_cancel();
        assert_eq!(progress.state(), RunState::Cancelling);
        assert!(progress.should_stop());
        assert!(progress.transition(RunState::Cancelled));
    }

    #[test]
    fn external_token_is_observed_by_should_stop() {
        let progress = controller(Duration::ZERO);
        progress.start();
        let token = progress.cancellation_token();
        assert!(!progress.should_stop());

        token.cancel();
        assert!(progress.should_stop());
        assert_eq!(progress.state(), RunState::Cancelling);
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let progress = controller(Duration::ZERO);
        assert!(!progress.transition(RunState::Completed));
        progress.start();
        progress.transition(RunState::Completed);
        assert!(!progress.transition(RunState::Running));
    }

    #[test]
    fn snapshot_reports_percent() {
        let progress = controller(Duration::ZERO);
        progress.add_total(Stage::Fingerprinting, 4, 400);
        progress.complete_item(Stage::Fingerprinting, 100);

        let snapshot = progress.snapshot(Stage::Fingerprinting);
        assert_eq!(snapshot.files_done, 1);
        assert_eq!(snapshot.files_total, 4);
        assert_eq!(snapshot.bytes_done, 100);
        assert!((snapshot.percent_complete - 25.0).abs() < 1e-9);
    }

    #[test]
    fn progress_events_are_throttled() {
        let (sender, receiver) = EventChannel::new();
        let progress = ProgressController::new(
            CancellationToken::new(),
            sender,
            Duration::from_secs(3600),
            16,
        );
        progress.add_total(Stage::Assessing, 100, 0);
        for _ in 0..100 {
            progress.complete_item(Stage::Assessing, 0);
        }

        let progress_events = std::iter::from_fn(|| receiver.try_recv())
            .filter(|e| matches!(e, Event::Progress(_)))
            .count();
        assert_eq!(progress_events, 1);
    }
}
