use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No encode thread has been started yet.
    Idle,
    Running,
    /// Stop requested, the encode thread is finishing queued and buffered frames.
    Draining,
    Stopped,
}

/// Lifecycle of one encode thread, shared between the module and the thread.
#[derive(Debug)]
pub struct EncodeSession {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl Default for EncodeSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, mut state: MutexGuard<'_, SessionState>, next: SessionState) {
        tracing::debug!(from = ?*state, to = ?next, "Encode session state changed");
        *state = next;
        self.changed.notify_all();
    }

    pub fn state(&self) -> SessionState {
        *self.lock()
    }

    /// Move from `Idle` to `Running`. Returns `false` if the session was started before.
    pub fn try_start(&self) -> bool {
        let state = self.lock();
        if *state != SessionState::Idle {
            return false;
        }
        self.set(state, SessionState::Running);
        true
    }

    /// Ask a running session to finish, an idle session stops right away.
    pub fn request_stop(&self) -> SessionState {
        let state = self.lock();
        let next = match *state {
            SessionState::Idle => SessionState::Stopped,
            SessionState::Running => SessionState::Draining,
            other => return other,
        };
        self.set(state, next);
        next
    }

    /// Called once the encode loop has returned, whatever the reason.
    pub fn on_loop_exit(&self) {
        let state = self.lock();
        if *state != SessionState::Stopped {
            self.set(state, SessionState::Stopped);
        }
    }

    /// Block until the session is stopped. Returns `false` on timeout.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| *state != SessionState::Stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *state == SessionState::Stopped
    }
}
