//! Cancellation and run state shared by the engine's loops.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Observable engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
}

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Why the loops stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    ViewerQuit,
    SourceFailed,
    LoopPanicked,
}

/// Cancellation signal shared by the capture loop, the detection loop and the engine.
///
/// Both loops poll `is_stopping()` between steps and sleep through `pause()`, so a
/// stop request wakes them immediately instead of waiting out a frame interval.
pub struct RunControl {
    stop: Mutex<Option<StopReason>>,
    wake: Condvar,
    state: AtomicU8,
    loops_alive: AtomicUsize,
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            stop: Mutex::new(None),
            wake: Condvar::new(),
            state: AtomicU8::new(STATE_IDLE),
            loops_alive: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> EngineState {
        match self.state.load(Ordering::SeqCst) {
            STATE_IDLE => EngineState::Idle,
            STATE_RUNNING => EngineState::Running,
            _ => EngineState::Stopped,
        }
    }

    pub(crate) fn mark_running(&self) {
        self.state.store(STATE_RUNNING, Ordering::SeqCst);
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(STATE_STOPPED, Ordering::SeqCst);
    }

    /// Register a loop thread. The engine reports `Stopped` once every
    /// registered loop has dropped its guard.
    pub(crate) fn enter_loop(self: &Arc<Self>) -> LoopGuard {
        self.loops_alive.fetch_add(1, Ordering::SeqCst);
        LoopGuard {
            control: self.clone(),
        }
    }

    /// Ask both loops to finish. The first reason wins.
    pub fn request_stop(&self, reason: StopReason) {
        let mut stop = match self.stop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if stop.is_none() {
            *stop = Some(reason);
        }
        self.wake.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        self.stop_reason().is_some()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.stop.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sleep for up to `duration`. Returns `true` when a stop was requested.
    pub fn pause(&self, duration: Duration) -> bool {
        let guard = match self.stop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.is_some() {
            return true;
        }
        let result = self
            .wake
            .wait_timeout_while(guard, duration, |stop| stop.is_none());
        match result {
            Ok((guard, _)) => guard.is_some(),
            Err(poisoned) => poisoned.into_inner().0.is_some(),
        }
    }
}

/// Held by a loop thread for its lifetime.
pub(crate) struct LoopGuard {
    control: Arc<RunControl>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            log::error!("{} panicked", current_thread_name());
            self.control.request_stop(StopReason::LoopPanicked);
        }
        if self.control.loops_alive.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.control.mark_stopped();
        }
    }
}

fn current_thread_name() -> String {
    std::thread::current()
        .name()
        .unwrap_or("engine loop")
        .to_string()
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}
