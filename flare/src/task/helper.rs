//! Per-(agent, task) exchange channel.
//!
//! A helper pair is created when an agent is registered against a task:
//! the agent keeps the [`HelperHandle`], the task keeps the
//! [`HelperEndpoint`]. The underlying queue is bounded, so an agent that
//! outruns its task blocks on `record` instead of growing memory.
//! Dropping either side closes the channel for the other.

use super::sampling::{strategy_for, SamplingStrategy};
use super::settings::ResolvedTaskSettings;
use crate::algorithm::Prediction;
use crate::core::fields::{self, FieldSpec, Fields, TaskSpecs};
use crate::core::transition::Transition;
use crate::error::{FlareError, Result};
use crate::messages::HelperMsg;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;

/// Agent side of a helper channel.
pub struct HelperHandle {
    task: Arc<str>,
    agent_id: usize,
    specs: Arc<TaskSpecs>,
    sample_interval: usize,
    since_marker: usize,
    tx: Sender<HelperMsg>,
    reply_rx: Receiver<Prediction>,
}

/// Task side of a helper channel.
pub(crate) struct HelperEndpoint {
    pub(crate) agent_id: usize,
    pub(crate) rx: Receiver<HelperMsg>,
    pub(crate) reply_tx: Sender<Prediction>,
    pub(crate) strategy: Box<dyn SamplingStrategy>,
}

impl HelperEndpoint {
    /// Queued messages not yet consumed.
    pub(crate) fn has_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Create a connected helper pair for `agent_id`.
pub(crate) fn helper_pair(
    settings: &ResolvedTaskSettings,
    specs: Arc<TaskSpecs>,
    agent_id: usize,
) -> (HelperHandle, HelperEndpoint) {
    let (tx, rx) = crossbeam_channel::bounded(settings.queue_capacity);
    let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);

    let handle = HelperHandle {
        task: Arc::from(settings.name.as_str()),
        agent_id,
        specs,
        sample_interval: settings.sample_interval,
        since_marker: 0,
        tx,
        reply_rx,
    };
    let endpoint = HelperEndpoint {
        agent_id,
        rx,
        reply_tx,
        strategy: strategy_for(&settings.sampling),
    };
    (handle, endpoint)
}

impl HelperHandle {
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn agent_id(&self) -> usize {
        self.agent_id
    }

    pub fn specs(&self) -> &TaskSpecs {
        &self.specs
    }

    pub fn input_specs(&self) -> &[FieldSpec] {
        &self.specs.inputs
    }

    pub fn action_specs(&self) -> &[FieldSpec] {
        &self.specs.actions
    }

    pub fn state_specs(&self) -> &[FieldSpec] {
        &self.specs.states
    }

    pub fn reward_specs(&self) -> &[FieldSpec] {
        &self.specs.rewards
    }

    /// Zero-valued recurrent state for a fresh episode.
    pub fn initial_states(&self) -> Fields {
        fields::zeros(&self.specs.states)
    }

    /// Records written since the last interval marker.
    pub fn pending_records(&self) -> usize {
        self.since_marker
    }

    /// Ask the task for an action. Blocks until the task's loop answers.
    pub fn predict(&mut self, inputs: Fields, states: Fields) -> Result<Prediction> {
        self.check("inputs", &self.specs.inputs, &inputs)?;
        self.check("states", &self.specs.states, &states)?;

        self.send(HelperMsg::Predict { inputs, states })?;
        self.reply_rx.recv().map_err(|_| self.closed())
    }

    /// Record one step. Every `sample_interval` records an interval marker follows.
    pub fn record(&mut self, mut transition: Transition) -> Result<()> {
        self.check("inputs", &self.specs.inputs, &transition.inputs)?;
        self.check("states", &self.specs.states, &transition.states)?;
        self.check("actions", &self.specs.actions, &transition.actions)?;
        self.check("rewards", &self.specs.rewards, &transition.rewards)?;
        transition.agent_id = self.agent_id;

        self.send(HelperMsg::Record(transition))?;
        self.since_marker += 1;
        if self.since_marker >= self.sample_interval {
            self.since_marker = 0;
            self.send(HelperMsg::IntervalElapsed)?;
        }
        Ok(())
    }

    /// Close a partially filled interval so the task learns from it.
    pub fn flush(&mut self) -> Result<()> {
        if self.since_marker > 0 {
            self.since_marker = 0;
            self.send(HelperMsg::IntervalElapsed)?;
        }
        Ok(())
    }

    fn send(&self, msg: HelperMsg) -> Result<()> {
        self.tx.send(msg).map_err(|_| self.closed())
    }

    fn check(&self, kind: &'static str, specs: &[FieldSpec], values: &Fields) -> Result<()> {
        fields::check(specs, values).map_err(|e| FlareError::ShapeMismatch {
            task: self.task.to_string(),
            kind,
            expected: e.expected,
            actual: e.actual,
        })
    }

    fn closed(&self) -> FlareError {
        FlareError::ChannelClosed {
            task: self.task.to_string(),
            agent_id: self.agent_id,
        }
    }
}

impl std::fmt::Debug for HelperHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperHandle")
            .field("task", &self.task)
            .field("agent_id", &self.agent_id)
            .field("sample_interval", &self.sample_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::settings::{RunSettings, TaskOptions};

    fn settings(interval: usize, capacity: usize) -> ResolvedTaskSettings {
        TaskOptions {
            sample_interval: Some(interval),
            num_agents: Some(1),
            queue_capacity: Some(capacity),
            ..Default::default()
        }
        .resolve("rl", &RunSettings::default())
        .unwrap()
    }

    fn specs() -> Arc<TaskSpecs> {
        Arc::new(TaskSpecs::new(
            vec![FieldSpec::new("obs", vec![2])],
            vec![FieldSpec::scalar("action")],
            vec![],
            vec![FieldSpec::scalar("reward")],
        ))
    }

    fn transition() -> Transition {
        Transition {
            agent_id: 99,
            inputs: vec![vec![0.0, 1.0]],
            states: vec![],
            actions: vec![vec![1.0]],
            rewards: vec![vec![0.5]],
            next_inputs: vec![vec![1.0, 2.0]],
            terminal: false,
            truncated: false,
        }
    }

    #[test]
    fn test_record_emits_marker_every_interval() {
        let (mut handle, endpoint) = helper_pair(&settings(2, 16), specs(), 3);
        for _ in 0..5 {
            handle.record(transition()).unwrap();
        }
        handle.flush().unwrap();
        drop(handle);

        let msgs: Vec<HelperMsg> = endpoint.rx.iter().collect();
        let markers: Vec<usize> = msgs
            .iter()
            .enumerate()
            .filter(|(_, m)| matches!(m, HelperMsg::IntervalElapsed))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(msgs.len(), 8);
        assert_eq!(markers, vec![2, 5, 7]);
        match &msgs[0] {
            HelperMsg::Record(t) => assert_eq!(t.agent_id, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_flush_without_pending_is_noop() {
        let (mut handle, endpoint) = helper_pair(&settings(2, 16), specs(), 0);
        handle.flush().unwrap();
        drop(handle);
        assert_eq!(endpoint.rx.iter().count(), 0);
    }

    #[test]
    fn test_shape_mismatch_is_rejected_before_sending() {
        let (mut handle, endpoint) = helper_pair(&settings(1, 16), specs(), 0);
        let mut bad = transition();
        bad.inputs = vec![vec![0.0]];

        let err = handle.record(bad).unwrap_err();
        assert!(matches!(err, FlareError::ShapeMismatch { kind: "inputs", .. }));
        assert!(!endpoint.has_pending());
    }

    #[test]
    fn test_closed_task_reports_channel_closed() {
        let (mut handle, endpoint) = helper_pair(&settings(1, 16), specs(), 4);
        drop(endpoint);

        let err = handle.record(transition()).unwrap_err();
        assert!(matches!(err, FlareError::ChannelClosed { agent_id: 4, .. }));
        let err = handle.predict(vec![vec![0.0, 0.0]], vec![]).unwrap_err();
        assert!(matches!(err, FlareError::ChannelClosed { .. }));
    }

    #[test]
    fn test_predict_round_trip() {
        let (mut handle, endpoint) = helper_pair(&settings(1, 16), specs(), 0);
        let server = std::thread::spawn(move || match endpoint.rx.recv().unwrap() {
            HelperMsg::Predict { inputs, .. } => {
                let action = inputs[0].iter().sum::<f32>();
                endpoint
                    .reply_tx
                    .send(Prediction::new(vec![vec![action]], vec![]))
                    .unwrap();
            }
            other => panic!("unexpected {other:?}"),
        });

        let prediction = handle.predict(vec![vec![1.0, 2.0]], vec![]).unwrap();
        assert_eq!(prediction.actions, vec![vec![3.0]]);
        server.join().unwrap();
    }

    #[test]
    fn test_record_blocks_when_queue_full() {
        let (mut handle, endpoint) = helper_pair(&settings(100, 1), specs(), 0);
        handle.record(transition()).unwrap();

        let writer = std::thread::spawn(move || {
            handle.record(transition()).unwrap();
            handle
        });
        std::thread::sleep(std::time::Duration::from_millis(30));
        assert!(!writer.is_finished());

        endpoint.rx.recv().unwrap();
        let handle = writer.join().unwrap();
        assert_eq!(handle.pending_records(), 2);
    }
}
