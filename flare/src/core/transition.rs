//! Records exchanged between an agent and a computation task.
//!
//! - `Transition`: one environment step as seen by one task
//! - `Batch`: the transitions of a single agent handed to one learning update

use super::fields::Fields;

/// One environment step recorded by an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// Identity of the agent that produced the step
    pub agent_id: usize,
    /// Observation the action was chosen from
    pub inputs: Fields,
    /// Recurrent state used for the prediction
    pub states: Fields,
    /// Action applied to the environment
    pub actions: Fields,
    /// Reward received for the action
    pub rewards: Fields,
    /// Observation after the step
    pub next_inputs: Fields,
    /// Episode terminated (goal reached, failure, etc.)
    pub terminal: bool,
    /// Episode truncated (time limit, etc.)
    pub truncated: bool,
}

impl Transition {
    /// Check if episode ended (terminal or truncated).
    pub fn done(&self) -> bool {
        self.terminal || self.truncated
    }

    /// Sum over all reward slots.
    pub fn total_reward(&self) -> f32 {
        self.rewards.iter().flatten().sum()
    }
}

/// Learning batch drawn from one agent's records.
///
/// Batches never mix agents: each helper feeds its own sampling strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub agent_id: usize,
    pub transitions: Vec<Transition>,
}

impl Batch {
    pub fn new(agent_id: usize, transitions: Vec<Transition>) -> Self {
        Self {
            agent_id,
            transitions,
        }
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn dones(&self) -> Vec<bool> {
        self.transitions.iter().map(|t| t.done()).collect()
    }

    pub fn total_reward(&self) -> f32 {
        self.transitions.iter().map(|t| t.total_reward()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(agent_id: usize, reward: f32, terminal: bool) -> Transition {
        Transition {
            agent_id,
            inputs: vec![vec![0.0]],
            states: vec![],
            actions: vec![vec![1.0]],
            rewards: vec![vec![reward]],
            next_inputs: vec![vec![1.0]],
            terminal,
            truncated: false,
        }
    }

    #[test]
    fn test_done_covers_truncation() {
        let mut t = step(0, 1.0, false);
        assert!(!t.done());
        t.truncated = true;
        assert!(t.done());
    }

    #[test]
    fn test_batch_reward_and_dones() {
        let batch = Batch::new(3, vec![step(3, 1.0, false), step(3, 0.5, true)]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dones(), vec![false, true]);
        assert!((batch.total_reward() - 1.5).abs() < 1e-6);
    }
}
