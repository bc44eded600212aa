//! Test doubles shared by unit tests.

use crate::algorithm::{Algorithm, Hyperparams, LearnOutcome, Prediction};
use crate::core::fields::{FieldSpec, Fields, TaskSpecs};
use crate::core::transition::Batch;
use crate::environment::{Environment, StepOutcome};
use crate::error::{AlgorithmError, EnvironmentError};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Observation: `[agent tag, sequence number]`. State: one step counter.
pub fn test_specs() -> TaskSpecs {
    TaskSpecs::new(
        vec![FieldSpec::new("obs", vec![2])],
        vec![FieldSpec::scalar("action")],
        vec![FieldSpec::scalar("h")],
        vec![FieldSpec::scalar("reward")],
    )
}

/// Shared view of what a [`CountingAlgorithm`] was asked to do.
#[derive(Clone, Default)]
pub struct Recorder {
    batches: Arc<Mutex<Vec<Batch>>>,
    predictions: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    pub fn batches_for(&self, agent_id: usize) -> Vec<Batch> {
        self.batches
            .lock()
            .iter()
            .filter(|b| b.agent_id == agent_id)
            .cloned()
            .collect()
    }

    pub fn updates(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn predictions(&self) -> usize {
        self.predictions.load(Ordering::SeqCst)
    }
}

type Hook = Box<dyn FnMut() + Send>;

/// Algorithm double that records every batch it learns from.
pub struct CountingAlgorithm {
    parameter: f32,
    recorder: Recorder,
    fail_learn_at: Option<usize>,
    predict_hook: Option<Hook>,
}

impl CountingAlgorithm {
    pub fn new() -> Self {
        Self {
            parameter: 0.0,
            recorder: Recorder::default(),
            fail_learn_at: None,
            predict_hook: None,
        }
    }

    /// Fail the `n`-th (1-based) learning update.
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_learn_at = Some(n);
        self
    }

    /// Run `hook` on every prediction, before answering.
    pub fn with_predict_hook(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.predict_hook = Some(Box::new(hook));
        self
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    pub fn parameter(&self) -> f32 {
        self.parameter
    }

    pub fn set_parameter(&mut self, value: f32) {
        self.parameter = value;
    }
}

impl Algorithm for CountingAlgorithm {
    fn specs(&self) -> TaskSpecs {
        test_specs()
    }

    fn predict(&mut self, _inputs: &Fields, states: &Fields) -> Result<Prediction, AlgorithmError> {
        if let Some(hook) = self.predict_hook.as_mut() {
            hook();
        }
        self.recorder.predictions.fetch_add(1, Ordering::SeqCst);
        let counter = states.first().and_then(|s| s.first()).copied().unwrap_or(0.0);
        Ok(Prediction::new(vec![vec![1.0]], vec![vec![counter + 1.0]]))
    }

    fn learn(&mut self, batch: &Batch, _hyperparams: &Hyperparams) -> Result<LearnOutcome, AlgorithmError> {
        let mut batches = self.recorder.batches.lock();
        if self.fail_learn_at == Some(batches.len() + 1) {
            return Err(AlgorithmError::new("diverged"));
        }
        batches.push(batch.clone());
        self.parameter += batch.len() as f32;
        Ok(LearnOutcome::with_loss(1.0 / self.parameter))
    }

    fn save(&self, writer: &mut dyn Write) -> Result<(), AlgorithmError> {
        serde_json::to_writer(writer, &self.parameter).map_err(|e| AlgorithmError::new(e.to_string()))
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<(), AlgorithmError> {
        self.parameter = serde_json::from_reader(reader).map_err(|e| AlgorithmError::new(e.to_string()))?;
        Ok(())
    }
}

/// Deterministic environment producing `[tag, seq]` observations.
///
/// `seq` increases by one per step and never resets, so the order of
/// recorded transitions can be checked end to end.
pub struct ScriptedEnv {
    tag: f32,
    seq: usize,
    episode_len: usize,
    episode_step: usize,
    fail_at: Option<usize>,
    reset_delay: Duration,
    step_delay: Duration,
}

impl ScriptedEnv {
    pub fn new(tag: usize, episode_len: usize) -> Self {
        Self {
            tag: tag as f32,
            seq: 0,
            episode_len,
            episode_step: 0,
            fail_at: None,
            reset_delay: Duration::ZERO,
            step_delay: Duration::ZERO,
        }
    }

    /// Fail on the `n`-th step (1-based).
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }
}

impl Environment for ScriptedEnv {
    fn reset(&mut self) -> Result<Fields, EnvironmentError> {
        if !self.reset_delay.is_zero() {
            std::thread::sleep(self.reset_delay);
        }
        self.episode_step = 0;
        Ok(vec![vec![self.tag, self.seq as f32]])
    }

    fn step(&mut self, _actions: &Fields) -> Result<StepOutcome, EnvironmentError> {
        if !self.step_delay.is_zero() {
            std::thread::sleep(self.step_delay);
        }
        if self.fail_at == Some(self.seq + 1) {
            return Err(EnvironmentError::new("simulator crashed"));
        }
        self.seq += 1;
        self.episode_step += 1;
        let terminal = self.episode_step >= self.episode_len;
        Ok(StepOutcome::new(vec![vec![self.tag, self.seq as f32]], 1.0, terminal))
    }
}

/// Sequence numbers of the inputs in `batches`, in order.
pub fn input_seqs(batches: &[Batch]) -> Vec<usize> {
    batches
        .iter()
        .flat_map(|b| b.transitions.iter())
        .map(|t| t.inputs[0][1] as usize)
        .collect()
}
