// Btmitm System Events
// Signalable notification primitives shared between the driver, the core
// and consumers

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// How a signalled event is reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearMode {
    /// A successful wait consumes the signal
    AutoClear,
    /// The signal stays set until `clear()`
    ManualClear,
}

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    closed: bool,
}

/// Waitable event, modelled on a kernel system event.
///
/// Repeated signals before a wait collapse into one: an auto-clear event
/// wakes exactly one wait per set state.
#[derive(Debug)]
pub struct SystemEvent {
    state: Mutex<EventState>,
    cond: Condvar,
    clear_mode: ClearMode,
    inter_process: bool,
}

impl SystemEvent {
    /// Create an unsignalled event
    pub fn new(clear_mode: ClearMode, inter_process: bool) -> Self {
        Self {
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
            clear_mode,
            inter_process,
        }
    }

    /// Create an auto-clear, process-local event
    pub fn auto_clear() -> Self {
        Self::new(ClearMode::AutoClear, false)
    }

    pub fn clear_mode(&self) -> ClearMode {
        self.clear_mode
    }

    /// Whether the event is meant to be shared with other processes
    pub fn is_inter_process(&self) -> bool {
        self.inter_process
    }

    /// Set the event and wake waiters. No-op once closed.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.signaled = true;
        self.cond.notify_all();
    }

    /// Reset the event
    pub fn clear(&self) {
        self.state.lock().signaled = false;
    }

    /// Whether the event is currently set (does not consume it)
    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Close the event; pending and future waits return `false`
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.signaled = false;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Block until the event is set.
    ///
    /// Returns `false` if the event was closed instead.
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            if state.signaled {
                self.consume(&mut state);
                return true;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Block until the event is set or `timeout` elapses.
    ///
    /// Returns `true` only if the wait observed the signal.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return false;
            }
            if state.signaled {
                self.consume(&mut state);
                return true;
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                if state.signaled && !state.closed {
                    self.consume(&mut state);
                    return true;
                }
                return false;
            }
        }
    }

    /// Non-blocking wait
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.signaled && !state.closed {
            self.consume(&mut state);
            true
        } else {
            false
        }
    }

    fn consume(&self, state: &mut EventState) {
        if self.clear_mode == ClearMode::AutoClear {
            state.signaled = false;
        }
    }
}
