//! Agent worker: one environment driven on its own thread.
//!
//! The worker resets its environment, publishes `Running`, then loops:
//! ask the acting task for an action, step the environment and record the
//! transition into every bound helper. It stops on budget exhaustion, on a
//! forced stop, or on an error, and always publishes `Stopped` before it
//! reports back to the coordinator.

use crate::core::fields::{FieldSpec, Fields};
use crate::core::readiness::{ReadinessFlag, SharedReadiness};
use crate::core::transition::Transition;
use crate::environment::Environment;
use crate::error::{ConfigError, FlareError, Result};
use crate::messages::{CoordinatorMsg, FinishReason, LogRecord};
use crate::stats::StatsSender;
use crate::task::{panic_message, HelperHandle};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfig {
    /// Episodes to run before stopping (`None` = unbounded)
    pub max_episodes: Option<usize>,
    /// Environment steps to run before stopping (`None` = unbounded)
    pub max_steps: Option<usize>,
    /// Task whose algorithm picks the actions (default: first task)
    pub acting_task: Option<String>,
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_episodes(mut self, episodes: usize) -> Self {
        self.max_episodes = Some(episodes);
        self
    }

    pub fn with_max_steps(mut self, steps: usize) -> Self {
        self.max_steps = Some(steps);
        self
    }

    pub fn with_acting_task(mut self, task: impl Into<String>) -> Self {
        self.acting_task = Some(task.into());
        self
    }
}

/// How the run loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgentExit {
    Completed,
    Stopped,
}

#[derive(Debug, Default)]
struct EpisodeProgress {
    steps: usize,
    reward: f32,
}

/// An agent before it is spawned.
pub struct AgentWorker {
    agent_id: usize,
    env: Box<dyn Environment>,
    config: AgentConfig,
    helpers: Vec<HelperHandle>,
    readiness: SharedReadiness,
    stats: Option<StatsSender>,
    total_steps: usize,
    episodes: usize,
    episode: EpisodeProgress,
}

impl AgentWorker {
    pub fn new(env: impl Environment + 'static, config: AgentConfig) -> Self {
        Self::boxed(Box::new(env), config)
    }

    pub fn boxed(env: Box<dyn Environment>, config: AgentConfig) -> Self {
        Self {
            agent_id: 0,
            env,
            config,
            helpers: Vec::new(),
            readiness: Arc::new(ReadinessFlag::new()),
            stats: None,
            total_steps: 0,
            episodes: 0,
            episode: EpisodeProgress::default(),
        }
    }

    pub fn agent_id(&self) -> usize {
        self.agent_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn readiness(&self) -> &SharedReadiness {
        &self.readiness
    }

    /// Tasks this agent records into, in attachment order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.helpers.iter().map(|h| h.task())
    }

    /// Assign identity at registration.
    pub(crate) fn bind(&mut self, agent_id: usize, readiness: SharedReadiness, stats: StatsSender) {
        self.agent_id = agent_id;
        self.readiness = readiness;
        self.stats = Some(stats);
    }

    pub(crate) fn attach_helper(&mut self, helper: HelperHandle) {
        self.helpers.push(helper);
    }

    /// Index of the helper whose task answers predictions.
    fn acting_index(&self) -> Result<usize> {
        if self.helpers.is_empty() {
            return Err(ConfigError::NoTasks.into());
        }
        match &self.config.acting_task {
            None => Ok(0),
            Some(task) => self
                .helpers
                .iter()
                .position(|h| h.task() == task)
                .ok_or_else(|| ConfigError::UnknownTask(task.clone()).into()),
        }
    }

    /// Move the worker onto its own thread.
    ///
    /// `events` receives exactly one `AgentFinished` once the readiness flag
    /// reads `Stopped`.
    pub fn spawn(mut self, events: Sender<CoordinatorMsg>) -> Result<AgentHandle> {
        let agent_id = self.agent_id;
        let readiness = Arc::clone(&self.readiness);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name(format!("agent-{agent_id}"))
            .spawn(move || {
                let reason = self.execute();
                self.readiness.mark_stopped();
                self.helpers.clear();
                debug!("agent {} finished: {:?}", agent_id, reason);
                let _ = events.send(CoordinatorMsg::agent_finished(agent_id, reason));
                let _ = done_tx.send(());
            })
            .map_err(FlareError::Spawn)?;

        Ok(AgentHandle {
            agent_id,
            readiness,
            thread,
            done_rx,
        })
    }

    fn execute(&mut self) -> FinishReason {
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| self.run()));
        let reason = match outcome {
            Ok(Ok(AgentExit::Completed)) => match self.flush_helpers() {
                Ok(()) => FinishReason::Completed,
                Err(e) => {
                    warn!("agent {} could not flush its last interval: {}", self.agent_id, e);
                    FinishReason::Failed(e.to_string())
                }
            },
            Ok(Ok(AgentExit::Stopped)) => FinishReason::Stopped,
            Ok(Err(e)) if self.readiness.is_stopped() => {
                debug!("agent {} interrupted: {}", self.agent_id, e);
                FinishReason::Stopped
            }
            Ok(Err(e)) => {
                warn!("agent {} stopped on error: {}", self.agent_id, e);
                FinishReason::Failed(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("agent {} panicked: {}", self.agent_id, message);
                FinishReason::Panicked(message)
            }
        };

        if self.episode.steps > 0 {
            self.submit(LogRecord::Steps {
                agent_id: self.agent_id,
                steps: self.episode.steps,
            });
        }
        info!(
            "agent {} ran {} steps over {} episodes",
            self.agent_id, self.total_steps, self.episodes
        );
        reason
    }

    fn run(&mut self) -> Result<AgentExit> {
        let acting = self.acting_index()?;
        let mut observation = self.reset_env()?;
        let mut states: Vec<Fields> = self.helpers.iter().map(|h| h.initial_states()).collect();
        self.readiness.mark_running();
        debug!("agent {} running", self.agent_id);

        let mut needs_reset = false;
        loop {
            if self.readiness.is_stopped() {
                return Ok(AgentExit::Stopped);
            }
            if self.budget_exhausted() {
                return Ok(AgentExit::Completed);
            }
            if needs_reset {
                observation = self.reset_env()?;
                states = self.helpers.iter().map(|h| h.initial_states()).collect();
                needs_reset = false;
            }

            let prediction = self.helpers[acting].predict(observation.clone(), states[acting].clone())?;
            let outcome = self.env.step(&prediction.actions).map_err(|e| FlareError::Environment {
                agent_id: self.agent_id,
                message: e.0,
            })?;
            self.total_steps += 1;
            self.episode.steps += 1;
            self.episode.reward += outcome.reward;

            for (index, helper) in self.helpers.iter_mut().enumerate() {
                let next_states = if index == acting {
                    prediction.states.clone()
                } else {
                    states[index].clone()
                };
                let transition = Transition {
                    agent_id: self.agent_id,
                    inputs: observation.clone(),
                    states: std::mem::replace(&mut states[index], next_states),
                    actions: prediction.actions.clone(),
                    rewards: reward_fields(helper.reward_specs(), outcome.reward),
                    next_inputs: outcome.observation.clone(),
                    terminal: outcome.terminal,
                    truncated: outcome.truncated,
                };
                helper.record(transition)?;
            }

            if outcome.done() {
                self.finish_episode();
                needs_reset = true;
            } else {
                observation = outcome.observation;
            }
        }
    }

    fn reset_env(&mut self) -> Result<Fields> {
        self.env.reset().map_err(|e| FlareError::Environment {
            agent_id: self.agent_id,
            message: e.0,
        })
    }

    fn budget_exhausted(&self) -> bool {
        self.config.max_steps.is_some_and(|max| self.total_steps >= max)
            || self.config.max_episodes.is_some_and(|max| self.episodes >= max)
    }

    fn finish_episode(&mut self) {
        self.episodes += 1;
        let episode = std::mem::take(&mut self.episode);
        self.submit(LogRecord::episode(self.agent_id, episode.steps, episode.reward));
    }

    fn flush_helpers(&mut self) -> Result<()> {
        for helper in &mut self.helpers {
            helper.flush()?;
        }
        Ok(())
    }

    fn submit(&self, record: LogRecord) {
        if let Some(stats) = &self.stats {
            stats.submit(record);
        }
    }
}

/// The scalar step reward, written into every reward field.
fn reward_fields(specs: &[FieldSpec], reward: f32) -> Fields {
    specs.iter().map(|spec| vec![reward; spec.numel()]).collect()
}

impl std::fmt::Debug for AgentWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentWorker")
            .field("agent_id", &self.agent_id)
            .field("config", &self.config)
            .field("helpers", &self.helpers.len())
            .field("readiness", &self.readiness.get())
            .finish_non_exhaustive()
    }
}

/// Handle to a spawned agent.
pub struct AgentHandle {
    agent_id: usize,
    readiness: SharedReadiness,
    thread: JoinHandle<()>,
    done_rx: Receiver<()>,
}

impl AgentHandle {
    pub fn agent_id(&self) -> usize {
        self.agent_id
    }

    pub fn readiness(&self) -> &SharedReadiness {
        &self.readiness
    }

    /// Force the agent's flag to `Stopped`; the agent exits at its next step.
    pub fn request_stop(&self) {
        self.readiness.force_stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the agent thread to exit.
    pub fn join(self) {
        if self.thread.join().is_err() {
            warn!("agent {} thread panicked outside its run loop", self.agent_id);
        }
    }

    /// Wait at most `timeout`; on timeout the thread is left detached.
    pub fn join_timeout(self, timeout: Duration) -> Result<()> {
        match self.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.join();
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(FlareError::ShutdownTimeout {
                component: format!("agent {}", self.agent_id),
                timeout,
            }),
        }
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("agent_id", &self.agent_id)
            .field("readiness", &self.readiness.get())
            .finish()
    }
}
