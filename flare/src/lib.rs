//! # Flare: multi-agent reinforcement learning orchestration
//!
//! Runs a population of agent workers against one or more computation tasks,
//! synchronizes their lifecycle and aggregates statistics without blocking
//! the workers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Coordinator                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Thread 1        Thread 2        Thread N                        │
//! │  ┌────────┐      ┌────────┐      ┌────────┐                      │
//! │  │Agent 0 │      │Agent 1 │      │Agent N │   one env each        │
//! │  └───┬────┘      └───┬────┘      └───┬────┘                      │
//! │      │ HelperHandle  │ (bounded, one per agent/task pair)        │
//! │      ▼               ▼               ▼                           │
//! │  ┌──────────────────────────┐   ┌──────────────────────────┐     │
//! │  │ TaskRunner "policy"      │   │ TaskRunner "critic"      │     │
//! │  │ predict / learn / save   │   │ predict / learn / save   │     │
//! │  └────────────┬─────────────┘   └────────────┬─────────────┘     │
//! │               │          LogRecord           │                   │
//! │               ▼                              ▼                   │
//! │             ┌──────────────────────────────────┐                 │
//! │             │ StatsAggregator (single consumer)│                 │
//! │             └──────────────────────────────────┘                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No task loop starts before every agent has published `Running`
//! (startup barrier). Agents stop on their own budget; tasks drain and exit
//! once every agent flag reads `Stopped`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use flare::{AgentConfig, AgentWorker, Coordinator, RunSettings, TaskSettings};
//!
//! let mut coordinator = Coordinator::new(RunSettings::default().with_model_dir("./models"))?;
//! coordinator.create_tasks([(
//!     "policy",
//!     TaskSettings::builder(MyAlgorithm::new())
//!         .with_sample_interval(32)
//!         .with_num_agents(4)
//!         .build(),
//! )])?;
//! for _ in 0..4 {
//!     coordinator.register_agent(AgentWorker::new(MyEnv::new(), AgentConfig::new().with_max_episodes(100)))?;
//! }
//! let stats = coordinator.start()?;
//! ```

pub mod agent;
pub mod algorithm;
pub mod checkpoint;
pub mod coordinator;
pub mod core;
pub mod environment;
pub mod error;
pub mod messages;
pub mod stats;
pub mod task;

#[cfg(test)]
mod test_support;

pub use agent::{AgentConfig, AgentHandle, AgentWorker};
pub use algorithm::{Algorithm, Hyperparams, LearnOutcome, Prediction};
pub use checkpoint::{CheckpointError, Checkpointer, CheckpointerConfig};
pub use coordinator::{Coordinator, InterruptHandle};
pub use crate::core::{Batch, FieldSpec, Fields, Readiness, ReadinessFlag, SharedReadiness, TaskSpecs, Transition};
pub use environment::{Environment, StepOutcome};
pub use error::{AlgorithmError, ConfigError, EnvironmentError, FlareError, Result};
pub use messages::{CoordinatorMsg, FinishReason, LogRecord};
pub use stats::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, RunStatistics, StatsAggregator};
pub use task::{HelperHandle, RunSettings, SamplingKind, TaskOptions, TaskRunner, TaskSettings};
