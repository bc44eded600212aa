//! External interrupt plumbing.
//!
//! Triggering an [`InterruptHandle`] sets a flag, aborts the startup latch
//! so a coordinator waiting on the barrier wakes up, and posts
//! `CoordinatorMsg::Interrupted` on the coordinator's event channel.

use crate::core::startup_latch::SharedStartupLatch;
use crate::messages::CoordinatorMsg;
use crossbeam_channel::Sender;
use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct InterruptHandle {
    triggered: Arc<AtomicBool>,
    latch: SharedStartupLatch,
    events: Sender<CoordinatorMsg>,
}

impl InterruptHandle {
    pub(crate) fn new(latch: SharedStartupLatch, events: Sender<CoordinatorMsg>) -> Self {
        Self {
            triggered: Arc::new(AtomicBool::new(false)),
            latch,
            events,
        }
    }

    /// Request the non-graceful shutdown. Only the first call has an effect.
    pub fn trigger(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("interrupt received, shutting down");
        self.latch.abort();
        let _ = self.events.send(CoordinatorMsg::Interrupted);
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    /// Route the process interrupt signal (Ctrl-C) to this handle.
    ///
    /// A process can install one handler; later attempts log a warning and
    /// return `false`.
    pub fn install(&self) -> bool {
        let handle = self.clone();
        match ctrlc::set_handler(move || handle.trigger()) {
            Ok(()) => true,
            Err(e) => {
                warn!("cannot install interrupt handler: {}", e);
                false
            }
        }
    }
}

impl std::fmt::Debug for InterruptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptHandle")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
