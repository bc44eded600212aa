//! Run coordinator.
//!
//! # Startup order
//!
//! 1. Interrupt handler (optional), stats aggregator
//! 2. Every agent thread
//! 3. Startup barrier: wait until no agent flag reads `NotStarted`
//! 4. Every task loop, handed the full set of agent flags
//!
//! # Shutdown
//!
//! Graceful: agents finish on their own budget, the coordinator joins them in
//! reverse registration order, lets each task drain, stops the tasks and then
//! the aggregator.
//!
//! Interrupt or fatal task failure: tasks are stopped first (this unblocks
//! agents waiting on them), every agent flag is forced to `Stopped`, and each
//! component gets `shutdown_timeout` to exit before it is abandoned.

use super::interrupt::InterruptHandle;
use crate::agent::{AgentHandle, AgentWorker};
use crate::core::readiness::{ReadinessFlag, SharedReadiness};
use crate::core::startup_latch::{LatchOutcome, SharedStartupLatch, StartupLatch};
use crate::error::{ConfigError, FlareError, Result};
use crate::messages::{CoordinatorMsg, FinishReason};
use crate::stats::{MetricsLogger, RunStatistics, StatsAggregator};
use crate::task::{RunSettings, TaskRunner, TaskSettings};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Owns every task, agent and the stats aggregator of one run.
pub struct Coordinator {
    settings: RunSettings,
    tasks: Vec<TaskRunner>,
    agents: Vec<AgentWorker>,
    flags: Vec<SharedReadiness>,
    stats: StatsAggregator,
    latch: SharedStartupLatch,
    events_tx: Sender<CoordinatorMsg>,
    events_rx: Receiver<CoordinatorMsg>,
    interrupt: InterruptHandle,
    started: bool,
}

impl Coordinator {
    pub fn new(settings: RunSettings) -> Result<Self> {
        settings.validate()?;
        let stats = StatsAggregator::new(&settings);
        Ok(Self::with_aggregator(settings, stats))
    }

    /// Send progress summaries to `logger` instead of the console/CSV sinks.
    pub fn with_logger(settings: RunSettings, logger: Box<dyn MetricsLogger>) -> Result<Self> {
        settings.validate()?;
        let stats = StatsAggregator::with_logger(&settings, logger);
        Ok(Self::with_aggregator(settings, stats))
    }

    fn with_aggregator(settings: RunSettings, stats: StatsAggregator) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let latch = Arc::new(StartupLatch::new());
        let interrupt = InterruptHandle::new(Arc::clone(&latch), events_tx.clone());
        Self {
            settings,
            tasks: Vec::new(),
            agents: Vec::new(),
            flags: Vec::new(),
            stats,
            latch,
            events_tx,
            events_rx,
            interrupt,
            started: false,
        }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Validate every task's settings, then build the tasks.
    ///
    /// Nothing is created if any entry is invalid. Tasks must be created
    /// before the first agent is registered.
    pub fn create_tasks<S, I>(&mut self, tasks: I) -> Result<()>
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, TaskSettings)>,
    {
        if self.started {
            return Err(FlareError::RegistrationClosed);
        }
        if !self.flags.is_empty() {
            return Err(ConfigError::Invalid {
                task: "run".to_string(),
                reason: "tasks must be created before agents are registered".to_string(),
            }
            .into());
        }

        let entries: Vec<(String, TaskSettings)> = tasks.into_iter().map(|(name, s)| (name.into(), s)).collect();
        if entries.is_empty() && self.tasks.is_empty() {
            return Err(ConfigError::NoTasks.into());
        }

        let mut names: BTreeSet<&str> = self.tasks.iter().map(|t| t.name()).collect();
        for (name, settings) in &entries {
            if !names.insert(name.as_str()) {
                return Err(ConfigError::DuplicateTask(name.clone()).into());
            }
            settings.validate(name, &self.settings)?;
        }

        let mut created = Vec::with_capacity(entries.len());
        for (name, settings) in entries {
            created.push(TaskRunner::new(&name, settings, &self.settings, self.stats.sender())?);
        }
        for task in &created {
            if let Some(saver) = task.model_saver() {
                self.stats.register_model_saver(task.name(), saver)?;
            }
            info!(
                "created task `{}` (sample_interval = {}, num_agents = {})",
                task.name(),
                task.settings().sample_interval,
                task.settings().num_agents
            );
        }
        self.tasks.extend(created);
        Ok(())
    }

    /// Bind `worker` to every task and return its identity.
    ///
    /// Identities are dense and follow registration order. On failure the
    /// coordinator is left exactly as before the call.
    pub fn register_agent(&mut self, mut worker: AgentWorker) -> Result<usize> {
        if self.started {
            return Err(FlareError::RegistrationClosed);
        }
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks.into());
        }
        if let Some(acting) = &worker.config().acting_task {
            if self.task(acting).is_none() {
                return Err(ConfigError::UnknownTask(acting.clone()).into());
            }
        }

        let agent_id = self.flags.len();
        let mut helpers = Vec::with_capacity(self.tasks.len());
        for index in 0..self.tasks.len() {
            match self.tasks[index].create_helper(agent_id) {
                Ok(helper) => helpers.push(helper),
                Err(e) => {
                    for task in &mut self.tasks[..index] {
                        task.remove_helper(agent_id);
                    }
                    return Err(e);
                }
            }
        }

        let flag = Arc::new(ReadinessFlag::with_latch(Arc::clone(&self.latch)));
        self.latch.add();
        worker.bind(agent_id, Arc::clone(&flag), self.stats.sender());
        for helper in helpers {
            worker.attach_helper(helper);
        }
        self.flags.push(flag);
        self.agents.push(worker);
        debug!("registered agent {}", agent_id);
        Ok(agent_id)
    }

    /// Register several agents in order. Stops at the first failure; agents
    /// registered before it stay registered.
    pub fn register_agents<I>(&mut self, workers: I) -> Result<Vec<usize>>
    where
        I: IntoIterator<Item = AgentWorker>,
    {
        workers.into_iter().map(|w| self.register_agent(w)).collect()
    }

    /// Unregister the most recently registered agent. Returns its identity.
    pub fn remove_agent(&mut self) -> Result<Option<usize>> {
        if self.started {
            return Err(FlareError::RegistrationClosed);
        }
        let Some(worker) = self.agents.pop() else {
            return Ok(None);
        };
        let agent_id = worker.agent_id();
        for task in &mut self.tasks {
            task.remove_helper(agent_id);
        }
        self.flags.pop();
        self.latch.remove();
        debug!("removed agent {}", agent_id);
        Ok(Some(agent_id))
    }

    pub fn num_agents(&self) -> usize {
        self.flags.len()
    }

    pub fn readiness_flags(&self) -> &[SharedReadiness] {
        &self.flags
    }

    pub fn task(&self, name: &str) -> Option<&TaskRunner> {
        self.tasks.iter().find(|t| t.name() == name)
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Handle that triggers the interrupt shutdown path.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Run to completion.
    ///
    /// Returns the final statistics after a graceful shutdown,
    /// `Err(FlareError::Interrupted)` after an interrupt, or the task's error
    /// after a fatal task failure.
    pub fn start(&mut self) -> Result<RunStatistics> {
        if self.started {
            return Err(FlareError::AlreadyStarted);
        }
        if self.tasks.is_empty() {
            return Err(ConfigError::NoTasks.into());
        }
        if self.agents.is_empty() {
            return Err(ConfigError::ZeroAgents.into());
        }
        self.started = true;

        if self.settings.install_interrupt_handler {
            self.interrupt.install();
        }
        self.stats.start()?;

        let mut handles = Vec::with_capacity(self.agents.len());
        let workers: Vec<AgentWorker> = self.agents.drain(..).collect();
        for worker in workers {
            match worker.spawn(self.events_tx.clone()) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!("failed to spawn agent: {}", e);
                    self.shutdown_forced(handles);
                    return Err(e);
                }
            }
        }

        info!("waiting for {} agents to start", handles.len());
        if self.latch.wait() == LatchOutcome::Aborted {
            self.shutdown_forced(handles);
            return Err(FlareError::Interrupted);
        }

        info!("all agents started, running {} tasks", self.tasks.len());
        for index in 0..self.tasks.len() {
            let flags = self.flags.clone();
            if let Err(e) = self.tasks[index].run(flags, self.events_tx.clone()) {
                error!("failed to start task `{}`: {}", self.tasks[index].name(), e);
                self.shutdown_forced(handles);
                return Err(e);
            }
        }

        let mut running = handles.len();
        while running > 0 {
            let Ok(event) = self.events_rx.recv() else {
                break;
            };
            match event {
                CoordinatorMsg::AgentFinished { agent_id, reason } => {
                    running -= 1;
                    if reason.is_failure() {
                        warn!("agent {} ended: {:?}", agent_id, reason);
                    } else {
                        debug!("agent {} ended: {:?}", agent_id, reason);
                    }
                }
                CoordinatorMsg::TaskFinished {
                    task,
                    reason: FinishReason::Failed(message),
                } => {
                    error!("task `{}` failed: {}", task, message);
                    self.shutdown_forced(handles);
                    let failure = self.take_task_failure();
                    return Err(failure.unwrap_or(FlareError::Algorithm { task, message }));
                }
                CoordinatorMsg::TaskFinished { task, reason } => {
                    debug!("task `{}` finished: {:?}", task, reason);
                }
                CoordinatorMsg::Interrupted => {
                    self.shutdown_forced(handles);
                    return Err(FlareError::Interrupted);
                }
            }
        }

        self.shutdown_graceful(handles)
    }

    fn shutdown_graceful(&mut self, handles: Vec<AgentHandle>) -> Result<RunStatistics> {
        info!("all agents finished, shutting down");
        for handle in handles.into_iter().rev() {
            handle.join();
        }

        let timeout = self.settings.shutdown_timeout();
        for task in &mut self.tasks {
            if !task.wait_drained(timeout) {
                warn!("task `{}` did not drain within {:?}", task.name(), timeout);
            }
            task.stop()?;
        }
        let failure = self.take_task_failure();

        self.stats.stop()?;
        let statistics = self.stats.take_statistics().unwrap_or_default();
        match failure {
            Some(e) => Err(e),
            None => {
                info!(
                    "run finished: {} steps, {} episodes, {} updates",
                    statistics.total_steps, statistics.episodes, statistics.updates
                );
                Ok(statistics)
            }
        }
    }

    /// Best-effort shutdown; every wait is bounded by `shutdown_timeout`.
    fn shutdown_forced(&mut self, handles: Vec<AgentHandle>) {
        let timeout = self.settings.shutdown_timeout();
        warn!("forced shutdown (timeout {:?} per component)", timeout);

        for task in &mut self.tasks {
            if let Err(e) = task.stop_timeout(timeout) {
                warn!("{}", e);
            }
        }
        for flag in &self.flags {
            flag.force_stop();
        }
        for handle in handles.into_iter().rev() {
            if let Err(e) = handle.join_timeout(timeout) {
                warn!("{}", e);
            }
        }
        if let Err(e) = self.stats.stop_timeout(timeout) {
            warn!("{}", e);
        }
    }

    fn take_task_failure(&mut self) -> Option<FlareError> {
        self.tasks.iter_mut().find_map(|t| t.take_failure())
    }

    /// Final statistics, when the last run stopped the aggregator without
    /// handing them out (interrupt or failure path).
    pub fn take_statistics(&mut self) -> Option<RunStatistics> {
        self.stats.take_statistics()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("tasks", &self.task_names())
            .field("agents", &self.flags.len())
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}
