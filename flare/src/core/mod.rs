//! Core types shared by agents, tasks and the coordinator.

pub mod fields;
pub mod readiness;
pub mod startup_latch;
pub mod transition;

pub use fields::{FieldSpec, Fields, ShapeError, TaskSpecs};
pub use readiness::{all_stopped, Readiness, ReadinessFlag, SharedReadiness};
pub use startup_latch::{LatchOutcome, SharedStartupLatch, StartupLatch};
pub use transition::{Batch, Transition};
