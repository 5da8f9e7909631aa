//! Shared pipeline state, passed to every worker and writer at spawn time.
//!
//! This is the one piece of mutable state crossing thread boundaries besides
//! the queues themselves; everything is atomic, and the error flag has
//! set-once semantics (first failure wins).

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::types::RigState;

/// State-change notifications for any front end or test harness; the core
/// never assumes a UI exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    StateChanged(RigState),
    ErrorRaised,
}

pub struct PipelineContext {
    error: AtomicBool,
    suppressed_errors: AtomicU32,
    stop: AtomicBool,
    recording: AtomicBool,
    viewing: AtomicBool,
    subscribers: Mutex<Vec<Sender<PipelineEvent>>>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            error: AtomicBool::new(false),
            suppressed_errors: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            recording: AtomicBool::new(false),
            viewing: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Raise the process-wide error flag. Returns true for the first
    /// failure; later failures are suppressed but counted.
    pub fn raise_error(&self) -> bool {
        let first = self
            .error
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            self.emit(PipelineEvent::ErrorRaised);
        } else {
            self.suppressed_errors.fetch_add(1, Ordering::Relaxed);
        }
        first
    }

    pub fn error_raised(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    pub fn suppressed_errors(&self) -> u32 {
        self.suppressed_errors.load(Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Reset per-session flags when a new session starts.
    pub fn reset_for_session(&self) {
        self.error.store(false, Ordering::SeqCst);
        self.suppressed_errors.store(0, Ordering::Relaxed);
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn set_recording(&self, on: bool) {
        self.recording.store(on, Ordering::SeqCst);
    }

    pub fn set_viewing(&self, on: bool) {
        self.viewing.store(on, Ordering::SeqCst);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn is_viewing(&self) -> bool {
        self.viewing.load(Ordering::SeqCst)
    }

    /// Subscribe to pipeline events. Dead receivers are pruned on emit.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().expect("lock poisoned").push(tx);
        rx
    }

    pub fn emit(&self, event: PipelineEvent) {
        let mut subs = self.subscribers.lock().expect("lock poisoned");
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
