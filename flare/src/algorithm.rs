//! Algorithm capability owned by a computation task.
//!
//! The task's consumption loop is the only caller of `predict`/`learn`.
//! `save`/`load` may additionally be called from the stats aggregator's
//! thread; the task serialises access behind a mutex.

use crate::core::fields::{Fields, TaskSpecs};
use crate::core::transition::Batch;
use crate::error::AlgorithmError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Action (and next recurrent state) chosen for one observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub actions: Fields,
    pub states: Fields,
}

impl Prediction {
    pub fn new(actions: Fields, states: Fields) -> Self {
        Self { actions, states }
    }
}

/// Summary of one policy update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LearnOutcome {
    pub loss: Option<f32>,
}

impl LearnOutcome {
    pub fn with_loss(loss: f32) -> Self {
        Self { loss: Some(loss) }
    }
}

/// Free-form algorithm hyperparameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparams(BTreeMap<String, Value>);

impl Hyperparams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Learning algorithm plugged into a computation task.
pub trait Algorithm: Send {
    /// Shape contracts agents must follow.
    fn specs(&self) -> TaskSpecs;

    /// Choose an action for one observation.
    fn predict(&mut self, inputs: &Fields, states: &Fields) -> Result<Prediction, AlgorithmError>;

    /// Update parameters from one agent's batch.
    fn learn(&mut self, batch: &Batch, hyperparams: &Hyperparams) -> Result<LearnOutcome, AlgorithmError>;

    /// Serialise parameters.
    fn save(&self, writer: &mut dyn Write) -> Result<(), AlgorithmError>;

    /// Restore parameters written by [`save`](Self::save).
    fn load(&mut self, reader: &mut dyn Read) -> Result<(), AlgorithmError>;
}
