//! Computation tasks.
//!
//! A task owns one algorithm and consumes the records of every agent that
//! participates in it. Each (agent, task) pair talks through its own bounded
//! queue: the agent holds a [`HelperHandle`], the task the matching endpoint.
//!
//! - [`TaskSettings`] / [`TaskOptions`]: per-task configuration
//! - [`RunSettings`]: run-wide configuration merged into every task
//! - [`SamplingStrategy`]: decides which records form a learning batch
//! - [`TaskRunner`]: the consumption loop

mod helper;
mod runner;
mod sampling;
mod settings;


pub use helper::HelperHandle;
pub use runner::TaskRunner;
pub use sampling::{strategy_for, ExperienceReplay, OnPolicy, SamplingStrategy};
pub use settings::{
    ResolvedTaskSettings, RunSettings, SamplingKind, TaskOptions, TaskSettings, TaskSettingsBuilder,
    DEFAULT_QUEUE_CAPACITY,
};

pub(crate) use runner::panic_message;
