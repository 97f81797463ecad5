use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A run is already in flight; the request had no side effects.
    Busy,
}

/// Point-in-time view of run progress, safe to hand to polling callers.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub processed: usize,
    pub saved: usize,
    pub current_label: String,
    pub is_running: bool,
}

/// Shared run state: progress counters plus the two-flag cooperative
/// cancellation protocol. One instance per process, injected into the worker
/// and the polling surface.
///
/// Counters are left at their final values after a run ends so late pollers
/// still see the last result; they reset at the start of the next run.
#[derive(Default)]
pub struct RunState {
    running: AtomicBool,
    stop_requested: AtomicBool,
    total: AtomicUsize,
    processed: AtomicUsize,
    saved: AtomicUsize,
    current_label: Mutex<String>,
    last_outcome: Mutex<Option<String>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the single run slot. Compare-and-set so racing starters
    /// cannot both win; the loser gets `false` and must not touch anything.
    pub fn begin(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.stop_requested.store(false, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        self.processed.store(0, Ordering::SeqCst);
        self.saved.store(0, Ordering::SeqCst);
        self.set_current_label("");
        true
    }

    /// Release the run slot unconditionally and record the terminal message.
    /// Called on every exit path so a later start is always possible.
    pub fn finish(&self, outcome: &str) {
        *self.last_outcome.lock().expect("outcome lock poisoned") = Some(outcome.to_string());
        self.running.store(false, Ordering::SeqCst);
    }

    /// Ask the in-flight run to stop at its next checkpoint. Returns `false`
    /// when no run is active.
    pub fn request_stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn incr_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn incr_saved(&self) {
        self.saved.fetch_add(1, Ordering::SeqCst);
    }

    pub fn saved(&self) -> usize {
        self.saved.load(Ordering::SeqCst)
    }

    pub fn set_current_label(&self, label: &str) {
        *self.current_label.lock().expect("label lock poisoned") = label.to_string();
    }

    /// Terminal message of the most recent run, if any has finished.
    pub fn last_outcome(&self) -> Option<String> {
        self.last_outcome
            .lock()
            .expect("outcome lock poisoned")
            .clone()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            saved: self.saved.load(Ordering::SeqCst),
            current_label: self
                .current_label
                .lock()
                .expect("label lock poisoned")
                .clone(),
            is_running: self.is_running(),
        }
    }
}
