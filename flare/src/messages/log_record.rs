//! Records consumed by the stats aggregator.

/// Statistics for one finished episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeLog {
    pub agent_id: usize,
    pub steps: usize,
    pub total_reward: f32,
}

/// Statistics for one policy update.
#[derive(Debug, Clone, PartialEq)]
pub struct LearnLog {
    pub task: String,
    pub agent_id: usize,
    pub batch_size: usize,
    pub loss: Option<f32>,
}

/// Immutable record produced by an agent or a task.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    /// Agent finished an episode.
    Episode(EpisodeLog),

    /// Steps of an unfinished episode, flushed when the agent stops.
    Steps { agent_id: usize, steps: usize },

    /// Task applied a learning update.
    Learn(LearnLog),

    /// Task reached its checkpoint cadence.
    ModelSave { task: String, pass: usize },
}

impl LogRecord {
    pub fn episode(agent_id: usize, steps: usize, total_reward: f32) -> Self {
        Self::Episode(EpisodeLog {
            agent_id,
            steps,
            total_reward,
        })
    }

    pub fn learn(task: impl Into<String>, agent_id: usize, batch_size: usize, loss: Option<f32>) -> Self {
        Self::Learn(LearnLog {
            task: task.into(),
            agent_id,
            batch_size,
            loss,
        })
    }

    /// Environment steps carried by this record.
    pub fn steps(&self) -> usize {
        match self {
            LogRecord::Episode(e) => e.steps,
            LogRecord::Steps { steps, .. } => *steps,
            LogRecord::Learn(_) | LogRecord::ModelSave { .. } => 0,
        }
    }
}
