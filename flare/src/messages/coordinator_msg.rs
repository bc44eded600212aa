//! Messages sent to the Coordinator.

/// Messages sent to the coordinator from workers.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorMsg {
    /// Agent thread finished.
    AgentFinished {
        agent_id: usize,
        reason: FinishReason,
    },

    /// Task consumption loop finished.
    TaskFinished {
        task: String,
        reason: FinishReason,
    },

    /// External interrupt received.
    Interrupted,
}

/// Reason why a thread finished.
#[derive(Debug, Clone, PartialEq)]
pub enum FinishReason {
    /// Ran to its own completion condition.
    Completed,

    /// Asked to stop from outside.
    Stopped,

    /// Gave up after an error.
    Failed(String),

    /// Thread panicked.
    Panicked(String),
}

impl FinishReason {
    /// True for `Failed` and `Panicked`.
    pub fn is_failure(&self) -> bool {
        matches!(self, FinishReason::Failed(_) | FinishReason::Panicked(_))
    }
}

impl CoordinatorMsg {
    pub fn agent_finished(agent_id: usize, reason: FinishReason) -> Self {
        Self::AgentFinished { agent_id, reason }
    }

    pub fn task_finished(task: impl Into<String>, reason: FinishReason) -> Self {
        Self::TaskFinished {
            task: task.into(),
            reason,
        }
    }
}
