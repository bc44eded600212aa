//! Environment capability consumed by agents.
//!
//! An environment is owned by exactly one agent for the agent's lifetime,
//! so implementations only need `Send`.

use crate::core::fields::Fields;
use crate::error::EnvironmentError;

/// Result of stepping an environment once.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Observation after the step
    pub observation: Fields,
    /// Reward for the applied action
    pub reward: f32,
    /// Episode ended due to goal/failure
    pub terminal: bool,
    /// Episode ended due to time limit
    pub truncated: bool,
}

impl StepOutcome {
    pub fn new(observation: Fields, reward: f32, terminal: bool) -> Self {
        Self {
            observation,
            reward,
            terminal,
            truncated: false,
        }
    }

    /// Mark the step as truncated.
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Done flag (terminal OR truncated).
    pub fn done(&self) -> bool {
        self.terminal || self.truncated
    }
}

/// Single environment instance.
pub trait Environment: Send {
    /// Start a new episode and return its first observation.
    fn reset(&mut self) -> Result<Fields, EnvironmentError>;

    /// Apply `actions` and advance one step.
    fn step(&mut self, actions: &Fields) -> Result<StepOutcome, EnvironmentError>;
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn reset(&mut self) -> Result<Fields, EnvironmentError> {
        (**self).reset()
    }

    fn step(&mut self, actions: &Fields) -> Result<StepOutcome, EnvironmentError> {
        (**self).step(actions)
    }
}
