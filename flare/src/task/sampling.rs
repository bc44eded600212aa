//! Per-agent sampling strategies.
//!
//! A strategy sees the records of exactly one agent (one helper) and
//! decides which of them form the next learning batch.

use super::settings::SamplingKind;
use crate::core::transition::Transition;
use std::collections::VecDeque;

/// Groups one agent's records into learning batches.
pub trait SamplingStrategy: Send {
    /// Store a newly received record.
    fn push(&mut self, transition: Transition);

    /// Called when the agent's interval elapsed. `None` = nothing to learn yet.
    fn sample(&mut self) -> Option<Vec<Transition>>;

    /// Records received since the last `sample` call.
    fn pending(&self) -> usize;
}

/// Build the strategy selected by `kind`.
pub fn strategy_for(kind: &SamplingKind) -> Box<dyn SamplingStrategy> {
    match *kind {
        SamplingKind::OnPolicy => Box::new(OnPolicy::new()),
        SamplingKind::ExperienceReplay {
            capacity,
            batch_size,
            warmup,
        } => Box::new(ExperienceReplay::new(capacity, batch_size, warmup)),
    }
}

/// Fixed-interval on-policy batching: each batch is exactly the records
/// written since the previous one, in order.
#[derive(Debug, Default)]
pub struct OnPolicy {
    buffer: Vec<Transition>,
}

impl OnPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SamplingStrategy for OnPolicy {
    fn push(&mut self, transition: Transition) {
        self.buffer.push(transition);
    }

    fn sample(&mut self) -> Option<Vec<Transition>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Ring-buffer replay memory with uniform minibatch sampling.
pub struct ExperienceReplay {
    capacity: usize,
    batch_size: usize,
    warmup: usize,
    memory: VecDeque<Transition>,
    fresh: usize,
    rng: fastrand::Rng,
}

impl ExperienceReplay {
    pub fn new(capacity: usize, batch_size: usize, warmup: usize) -> Self {
        Self {
            capacity,
            batch_size,
            warmup,
            memory: VecDeque::with_capacity(capacity),
            fresh: 0,
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic sampling for reproducible runs.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = fastrand::Rng::with_seed(seed);
        self
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }
}

impl SamplingStrategy for ExperienceReplay {
    fn push(&mut self, transition: Transition) {
        if self.memory.len() == self.capacity {
            self.memory.pop_front();
        }
        self.memory.push_back(transition);
        self.fresh += 1;
    }

    fn sample(&mut self) -> Option<Vec<Transition>> {
        self.fresh = 0;
        if self.memory.len() < self.warmup.max(self.batch_size) {
            return None;
        }
        let len = self.memory.len();
        let batch = (0..self.batch_size)
            .map(|_| self.memory[self.rng.usize(0..len)].clone())
            .collect();
        Some(batch)
    }

    fn pending(&self) -> usize {
        self.fresh
    }
}
