//! Messages carried by a helper channel from one agent to one task.

use crate::core::fields::Fields;
use crate::core::transition::Transition;

/// Agent-to-task traffic. Delivered in send order for each (agent, task) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperMsg {
    /// Ask the task's algorithm for an action; answered on the helper's reply channel.
    Predict { inputs: Fields, states: Fields },

    /// One recorded environment step.
    Record(Transition),

    /// `sample_interval` records have been written since the last marker
    /// (or the agent is flushing a final partial interval).
    IntervalElapsed,
}
