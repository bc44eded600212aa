//! Tri-state liveness flag published by each agent.
//!
//! The flag only moves forward (`NotStarted -> Running -> Stopped`), which
//! makes `fetch_max` on the underlying byte the whole transition logic.
//! Its owning agent thread is the only regular writer; the coordinator
//! forces `Stopped` on the interrupt path.

use super::startup_latch::StartupLatch;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Agent lifecycle state as seen by other components.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Readiness {
    NotStarted = 0,
    Running = 1,
    Stopped = 2,
}

impl Readiness {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Readiness::NotStarted,
            1 => Readiness::Running,
            _ => Readiness::Stopped,
        }
    }
}

/// Monotonic readiness flag.
///
/// When attached to a [`StartupLatch`], the first transition out of
/// `NotStarted` (to either `Running` or `Stopped`) counts the latch down
/// exactly once.
#[derive(Debug)]
pub struct ReadinessFlag {
    state: AtomicU8,
    latch: Option<Arc<StartupLatch>>,
}

impl ReadinessFlag {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(Readiness::NotStarted as u8),
            latch: None,
        }
    }

    pub fn with_latch(latch: Arc<StartupLatch>) -> Self {
        Self {
            state: AtomicU8::new(Readiness::NotStarted as u8),
            latch: Some(latch),
        }
    }

    pub fn get(&self) -> Readiness {
        Readiness::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.get() == Readiness::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.get() == Readiness::Stopped
    }

    /// Publish `Running`. No effect once stopped.
    pub fn mark_running(&self) -> Readiness {
        self.advance(Readiness::Running)
    }

    /// Publish `Stopped`. Terminal.
    pub fn mark_stopped(&self) -> Readiness {
        self.advance(Readiness::Stopped)
    }

    /// Force `Stopped` from outside the owning agent (interrupt path).
    pub fn force_stop(&self) -> Readiness {
        self.advance(Readiness::Stopped)
    }

    /// Move forward to `target`, returning the previous state.
    fn advance(&self, target: Readiness) -> Readiness {
        let previous = Readiness::from_u8(self.state.fetch_max(target as u8, Ordering::AcqRel));
        if previous == Readiness::NotStarted && target > Readiness::NotStarted {
            if let Some(latch) = &self.latch {
                latch.arrive();
            }
        }
        previous
    }
}

impl Default for ReadinessFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared readiness flag.
pub type SharedReadiness = Arc<ReadinessFlag>;

/// True once every flag reports `Stopped`.
pub fn all_stopped(flags: &[SharedReadiness]) -> bool {
    flags.iter().all(|f| f.is_stopped())
}

/// True once no flag is still `NotStarted`.
#[cfg(test)]
fn all_started(flags: &[SharedReadiness]) -> bool {
    flags.iter().all(|f| f.get() != Readiness::NotStarted)
}
