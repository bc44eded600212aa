//! Value-shape contracts between agents and computation tasks.
//!
//! Every task declares four contracts (inputs, actions, states, rewards).
//! Each contract is an ordered list of named slots with a fixed shape; the
//! values an agent exchanges are stored in the same order as flat `f32`
//! vectors, one per slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Values for one contract, one flat vector per declared slot.
pub type Fields = Vec<Vec<f32>>;

/// Name and shape of one value slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, shape: impl Into<Vec<usize>>) -> Self {
        Self {
            name: name.into(),
            shape: shape.into(),
        }
    }

    /// Scalar slot (shape `[1]`).
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, vec![1])
    }

    /// Number of `f32` elements a value for this slot holds.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:?}", self.name, self.shape)
    }
}

/// The four contracts a task exposes to its agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpecs {
    pub inputs: Vec<FieldSpec>,
    pub actions: Vec<FieldSpec>,
    pub states: Vec<FieldSpec>,
    pub rewards: Vec<FieldSpec>,
}

impl TaskSpecs {
    pub fn new(
        inputs: Vec<FieldSpec>,
        actions: Vec<FieldSpec>,
        states: Vec<FieldSpec>,
        rewards: Vec<FieldSpec>,
    ) -> Self {
        Self {
            inputs,
            actions,
            states,
            rewards,
        }
    }
}

/// Zero-valued fields matching `specs`.
pub fn zeros(specs: &[FieldSpec]) -> Fields {
    specs.iter().map(|s| vec![0.0; s.numel()]).collect()
}

/// Slot names, in declaration order.
pub fn names(specs: &[FieldSpec]) -> Vec<&str> {
    specs.iter().map(|s| s.name.as_str()).collect()
}

/// Describes how a value set deviates from its contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeError {
    pub expected: String,
    pub actual: String,
}

/// Check that `values` has one entry per slot with the declared element count.
pub fn check(specs: &[FieldSpec], values: &Fields) -> Result<(), ShapeError> {
    let matches = specs.len() == values.len()
        && specs
            .iter()
            .zip(values.iter())
            .all(|(spec, value)| spec.numel() == value.len());
    if matches {
        return Ok(());
    }

    let expected = specs
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let actual = values
        .iter()
        .map(|v| format!("[{}]", v.len()))
        .collect::<Vec<_>>()
        .join(", ");
    Err(ShapeError {
        expected: format!("({expected})"),
        actual: format!("({actual})"),
    })
}
