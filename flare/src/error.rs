//! Error taxonomy for the orchestration layer.
//!
//! Configuration problems surface before any thread is spawned. Failures of
//! a single agent stay local to that agent; a failing task aborts the run.

use crate::checkpoint::CheckpointError;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Invalid or inconsistent task/run settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("task `{0}` is configured more than once")]
    DuplicateTask(String),

    #[error("task `{task}` is missing required field `{field}`")]
    MissingField { task: String, field: &'static str },

    #[error("{field} of `{task}` must be > 0, got {value}")]
    InvalidCount {
        task: String,
        field: &'static str,
        value: usize,
    },

    #[error("invalid settings for `{task}`: {reason}")]
    Invalid { task: String, reason: String },

    #[error("no computation tasks configured")]
    NoTasks,

    #[error("unknown task `{0}`")]
    UnknownTask(String),

    #[error("cannot start without registered agents")]
    ZeroAgents,
}

/// Failure reported by an environment implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EnvironmentError(pub String);

impl EnvironmentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Failure reported by an algorithm implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AlgorithmError(pub String);

impl AlgorithmError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum FlareError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("agent {agent_id} already has a helper for task `{task}`")]
    DuplicateAgent { task: String, agent_id: usize },

    #[error("environment of agent {agent_id} failed: {message}")]
    Environment { agent_id: usize, message: String },

    #[error("helper channel of agent {agent_id} to task `{task}` is closed")]
    ChannelClosed { task: String, agent_id: usize },

    #[error("{component} did not stop within {timeout:?}")]
    ShutdownTimeout {
        component: String,
        timeout: Duration,
    },

    #[error("algorithm of task `{task}` failed: {message}")]
    Algorithm { task: String, message: String },

    #[error("{kind} for task `{task}` expected {expected}, got {actual}")]
    ShapeMismatch {
        task: String,
        kind: &'static str,
        expected: String,
        actual: String,
    },

    #[error("agents cannot be registered or removed after start")]
    RegistrationClosed,

    #[error("already started")]
    AlreadyStarted,

    #[error("run interrupted")]
    Interrupted,

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, FlareError>;
