//! Accumulated run statistics.
//!
//! Owned by the aggregator thread while the run is live; handed out once
//! after the aggregator has drained and stopped.

use crate::messages::{EpisodeLog, LearnLog, LogRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Per-agent counters.
///
/// The reward average uses Welford's online update and skips non-finite
/// rewards, which are still counted in `filtered_episodes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentSummary {
    pub agent_id: usize,
    /// Environment steps, including those of an unfinished last episode.
    pub steps: usize,
    pub episodes: usize,
    pub valid_episodes: usize,
    pub filtered_episodes: usize,
    pub avg_episode_reward: f32,
    pub recent_episode_reward: f32,
}

impl AgentSummary {
    pub fn new(agent_id: usize) -> Self {
        Self {
            agent_id,
            ..Default::default()
        }
    }

    pub fn record_episode(&mut self, steps: usize, reward: f32) {
        self.steps += steps;
        self.episodes += 1;
        self.recent_episode_reward = reward;
        if !reward.is_finite() {
            self.filtered_episodes += 1;
            return;
        }
        self.valid_episodes += 1;
        self.avg_episode_reward += (reward - self.avg_episode_reward) / self.valid_episodes as f32;
    }

    pub fn record_steps(&mut self, steps: usize) {
        self.steps += steps;
    }
}

/// Per-task counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskSummary {
    pub task: String,
    pub updates: usize,
    /// Records consumed by learning updates.
    pub samples: usize,
    pub last_loss: Option<f32>,
    pub checkpoints_saved: usize,
    pub checkpoint_failures: usize,
    pub last_checkpoint: Option<PathBuf>,
}

impl TaskSummary {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }
}

/// Process-wide statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    /// Log records consumed.
    pub records: usize,
    pub total_steps: usize,
    pub episodes: usize,
    pub valid_episodes: usize,
    pub avg_episode_reward: f32,
    pub updates: usize,
    /// Checkpoint signals received.
    pub save_requests: usize,
    /// Progress summaries emitted.
    pub summaries: usize,
    pub agents: BTreeMap<usize, AgentSummary>,
    pub tasks: BTreeMap<String, TaskSummary>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the counters.
    pub fn apply(&mut self, record: &LogRecord) {
        self.records += 1;
        match record {
            LogRecord::Episode(episode) => self.apply_episode(episode),
            LogRecord::Steps { agent_id, steps } => {
                self.total_steps += steps;
                self.agent_mut(*agent_id).record_steps(*steps);
            }
            LogRecord::Learn(learn) => self.apply_learn(learn),
            LogRecord::ModelSave { .. } => self.save_requests += 1,
        }
    }

    pub fn record_checkpoint(&mut self, task: &str, saved: Option<PathBuf>) {
        let summary = self.task_mut(task);
        match saved {
            Some(path) => {
                summary.checkpoints_saved += 1;
                summary.last_checkpoint = Some(path);
            }
            None => summary.checkpoint_failures += 1,
        }
    }

    pub fn agent(&self, agent_id: usize) -> Option<&AgentSummary> {
        self.agents.get(&agent_id)
    }

    pub fn task(&self, task: &str) -> Option<&TaskSummary> {
        self.tasks.get(task)
    }

    pub fn checkpoints_saved(&self) -> usize {
        self.tasks.values().map(|t| t.checkpoints_saved).sum()
    }

    fn apply_episode(&mut self, episode: &EpisodeLog) {
        self.total_steps += episode.steps;
        self.episodes += 1;
        if episode.total_reward.is_finite() {
            self.valid_episodes += 1;
            self.avg_episode_reward += (episode.total_reward - self.avg_episode_reward) / self.valid_episodes as f32;
        }
        self.agent_mut(episode.agent_id)
            .record_episode(episode.steps, episode.total_reward);
    }

    fn apply_learn(&mut self, learn: &LearnLog) {
        self.updates += 1;
        let summary = self.task_mut(&learn.task);
        summary.updates += 1;
        summary.samples += learn.batch_size;
        if learn.loss.is_some() {
            summary.last_loss = learn.loss;
        }
    }

    fn agent_mut(&mut self, agent_id: usize) -> &mut AgentSummary {
        self.agents
            .entry(agent_id)
            .or_insert_with(|| AgentSummary::new(agent_id))
    }

    fn task_mut(&mut self, task: &str) -> &mut TaskSummary {
        self.tasks
            .entry(task.to_string())
            .or_insert_with(|| TaskSummary::new(task))
    }
}
