//! Toy multi-armed bandit and an epsilon-greedy learner.

use flare::{
    Algorithm, AlgorithmError, Batch, Environment, EnvironmentError, FieldSpec, Fields, Hyperparams,
    LearnOutcome, Prediction, StepOutcome, TaskSpecs,
};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Arms pay `mean + uniform(-0.5, 0.5)`.
pub struct Bandit {
    means: Vec<f32>,
    episode_len: usize,
    pulls: usize,
    rng: fastrand::Rng,
}

impl Bandit {
    pub fn new(means: Vec<f32>, episode_len: usize, seed: u64) -> Self {
        Self {
            means,
            episode_len,
            pulls: 0,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    fn observation(&self) -> Fields {
        vec![vec![self.pulls as f32 / self.episode_len as f32]]
    }
}

impl Environment for Bandit {
    fn reset(&mut self) -> Result<Fields, EnvironmentError> {
        self.pulls = 0;
        Ok(self.observation())
    }

    fn step(&mut self, actions: &Fields) -> Result<StepOutcome, EnvironmentError> {
        let arm = actions
            .first()
            .and_then(|a| a.first())
            .map(|a| *a as usize)
            .ok_or_else(|| EnvironmentError::new("missing arm"))?;
        let mean = self
            .means
            .get(arm)
            .copied()
            .ok_or_else(|| EnvironmentError::new(format!("arm {arm} out of range")))?;

        self.pulls += 1;
        let reward = mean + self.rng.f32() - 0.5;
        Ok(StepOutcome::new(self.observation(), reward, false).with_truncated(self.pulls >= self.episode_len))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ArmEstimates {
    values: Vec<f32>,
    counts: Vec<u64>,
}

/// Sample-average value estimates with epsilon-greedy action selection.
pub struct EpsilonGreedy {
    estimates: ArmEstimates,
    epsilon: f64,
    rng: fastrand::Rng,
}

impl EpsilonGreedy {
    pub fn new(arms: usize, epsilon: f64) -> Self {
        Self {
            estimates: ArmEstimates {
                values: vec![0.0; arms],
                counts: vec![0; arms],
            },
            epsilon,
            rng: fastrand::Rng::new(),
        }
    }

    fn greedy_arm(&self) -> usize {
        self.estimates
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(arm, _)| arm)
            .unwrap_or(0)
    }
}

impl Algorithm for EpsilonGreedy {
    fn specs(&self) -> TaskSpecs {
        TaskSpecs::new(
            vec![FieldSpec::scalar("progress")],
            vec![FieldSpec::scalar("arm")],
            vec![],
            vec![FieldSpec::scalar("reward")],
        )
    }

    fn predict(&mut self, _inputs: &Fields, _states: &Fields) -> Result<Prediction, AlgorithmError> {
        let arms = self.estimates.values.len();
        let arm = if self.rng.f64() < self.epsilon {
            self.rng.usize(..arms)
        } else {
            self.greedy_arm()
        };
        Ok(Prediction::new(vec![vec![arm as f32]], vec![]))
    }

    fn learn(&mut self, batch: &Batch, hyperparams: &Hyperparams) -> Result<LearnOutcome, AlgorithmError> {
        if let Some(epsilon) = hyperparams.get_f64("epsilon") {
            self.epsilon = epsilon;
        }

        let mut error = 0.0;
        for transition in &batch.transitions {
            let arm = transition.actions[0][0] as usize;
            let reward = transition.rewards[0][0];
            let Some(count) = self.estimates.counts.get_mut(arm) else {
                return Err(AlgorithmError::new(format!("arm {arm} out of range")));
            };
            *count += 1;
            let value = &mut self.estimates.values[arm];
            let delta = reward - *value;
            *value += delta / *count as f32;
            error += delta * delta;
        }
        Ok(LearnOutcome::with_loss(error / batch.len().max(1) as f32))
    }

    fn save(&self, writer: &mut dyn Write) -> Result<(), AlgorithmError> {
        serde_json::to_writer(writer, &self.estimates).map_err(|e| AlgorithmError::new(e.to_string()))
    }

    fn load(&mut self, reader: &mut dyn Read) -> Result<(), AlgorithmError> {
        let estimates: ArmEstimates =
            serde_json::from_reader(reader).map_err(|e| AlgorithmError::new(e.to_string()))?;
        if estimates.values.len() != self.estimates.values.len() {
            return Err(AlgorithmError::new("checkpoint has a different number of arms"));
        }
        self.estimates = estimates;
        Ok(())
    }
}
