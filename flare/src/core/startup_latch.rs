//! Counting latch behind the coordinator's startup barrier.
//!
//! Every registered agent adds one count; the count drops when the agent
//! leaves its `NotStarted` state. The coordinator parks on a condition
//! variable until the count reaches zero or the latch is aborted by an
//! interrupt.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Outcome of waiting on the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchOutcome {
    /// Every participant arrived.
    Released,
    /// The wait was cancelled before every participant arrived.
    Aborted,
}

#[derive(Debug, Default)]
struct LatchState {
    remaining: usize,
    aborted: bool,
}

/// Count-down latch with abort support.
#[derive(Debug, Default)]
pub struct StartupLatch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl StartupLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more participant.
    pub fn add(&self) {
        self.state.lock().remaining += 1;
    }

    /// Withdraw a participant that never started.
    pub fn remove(&self) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            self.cond.notify_all();
        }
    }

    /// Mark one participant as arrived.
    pub fn arrive(&self) {
        self.remove();
    }

    /// Cancel all current and future waits.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        self.cond.notify_all();
    }

    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    #[cfg(test)]
    fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Block until released or aborted. Abort wins if both hold.
    pub fn wait(&self) -> LatchOutcome {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return LatchOutcome::Aborted;
            }
            if state.remaining == 0 {
                return LatchOutcome::Released;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Like [`wait`](Self::wait), returning `None` if `timeout` elapses first.
    #[cfg(test)]
    fn wait_timeout(&self, timeout: std::time::Duration) -> Option<LatchOutcome> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Some(LatchOutcome::Aborted);
            }
            if state.remaining == 0 {
                return Some(LatchOutcome::Released);
            }
            if self.cond.wait_for(&mut state, timeout).timed_out() {
                return if state.aborted {
                    Some(LatchOutcome::Aborted)
                } else if state.remaining == 0 {
                    Some(LatchOutcome::Released)
                } else {
                    None
                };
            }
        }
    }
}

/// Shared latch.
pub type SharedStartupLatch = Arc<StartupLatch>;
