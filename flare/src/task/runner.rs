//! Computation task: learning state plus its consumption loop.
//!
//! # Lifecycle
//!
//! 1. `new` resolves settings, optionally restores a checkpoint
//! 2. `create_helper` is called once per registered agent
//! 3. `run` moves every helper endpoint into a dedicated thread
//! 4. The loop ends on `stop`, or by itself once every agent flag reads
//!    `Stopped` and no helper has queued messages
//!
//! The algorithm sits behind a mutex so the stats aggregator can persist
//! it (see [`TaskRunner::model_saver`]) while the loop is running.

use super::helper::{helper_pair, HelperEndpoint, HelperHandle};
use super::settings::{ResolvedTaskSettings, RunSettings, TaskSettings};
use crate::algorithm::Algorithm;
use crate::checkpoint::{Checkpointer, CheckpointerConfig};
use crate::core::fields::{FieldSpec, TaskSpecs};
use crate::core::readiness::{all_stopped, SharedReadiness};
use crate::core::transition::Batch;
use crate::error::{AlgorithmError, FlareError, Result};
use crate::messages::{CoordinatorMsg, FinishReason, HelperMsg, LogRecord};
use crate::stats::{ModelSaveCallback, StatsSender};
use crossbeam_channel::{Receiver, RecvTimeoutError, Select, Sender};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type SharedAlgorithm = Arc<Mutex<Box<dyn Algorithm>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunnerState {
    Idle,
    Running,
    Stopped,
}

/// How the consumption loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Drained,
    Stopped,
}

struct TaskWorker {
    thread: JoinHandle<Result<()>>,
    done_rx: Receiver<()>,
}

/// One named computation task.
pub struct TaskRunner {
    settings: Arc<ResolvedTaskSettings>,
    specs: Arc<TaskSpecs>,
    algorithm: SharedAlgorithm,
    checkpointer: Option<Arc<Mutex<Checkpointer>>>,
    /// Pass the run resumed from; later passes count on from it.
    base_pass: usize,
    checkpoint_pass: Arc<AtomicUsize>,
    endpoints: BTreeMap<usize, HelperEndpoint>,
    stats: StatsSender,
    stop: Arc<AtomicBool>,
    updates: Arc<AtomicUsize>,
    worker: Option<TaskWorker>,
    outcome: Option<Result<()>>,
    state: RunnerState,
}

impl TaskRunner {
    /// Build a task from its settings, merging the run-wide settings.
    pub fn new(name: &str, settings: TaskSettings, run: &RunSettings, stats: StatsSender) -> Result<Self> {
        let resolved = settings.options.resolve(name, run)?;
        let mut algorithm = settings.algorithm;
        let specs = Arc::new(algorithm.specs());
        let mut base_pass = run.pass_num;

        let checkpointer = match &run.model_dir {
            Some(dir) => {
                let config = CheckpointerConfig::new(dir.join(name)).with_keep_last_n(run.keep_last_n);
                let checkpointer = Checkpointer::new(config)?;
                if run.load_model {
                    let info = if run.pass_num > 0 {
                        checkpointer.load_pass(algorithm.as_mut(), run.pass_num)?
                    } else {
                        checkpointer.load_latest(algorithm.as_mut())?
                    };
                    info!("task `{}` restored pass {} from {}", name, info.pass, info.path.display());
                    base_pass = info.pass;
                }
                Some(Arc::new(Mutex::new(checkpointer)))
            }
            None => {
                if run.load_model {
                    warn!("task `{}`: load_model is set but no model_dir is configured", name);
                }
                None
            }
        };

        Ok(Self {
            base_pass,
            checkpoint_pass: Arc::new(AtomicUsize::new(base_pass)),
            settings: Arc::new(resolved),
            specs,
            algorithm: Arc::new(Mutex::new(algorithm)),
            checkpointer,
            endpoints: BTreeMap::new(),
            stats,
            stop: Arc::new(AtomicBool::new(false)),
            updates: Arc::new(AtomicUsize::new(0)),
            worker: None,
            outcome: None,
            state: RunnerState::Idle,
        })
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &ResolvedTaskSettings {
        &self.settings
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

    /// Pass the next checkpoint numbers count on from.
    pub fn base_pass(&self) -> usize {
        self.base_pass
    }

    /// Learning updates applied so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Acquire)
    }

    /// Helpers created and not yet handed to the loop.
    pub fn helper_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn has_helper(&self, agent_id: usize) -> bool {
        self.endpoints.contains_key(&agent_id)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.thread.is_finished())
            .unwrap_or(false)
    }

    /// Allocate the exchange channel for `agent_id`.
    pub fn create_helper(&mut self, agent_id: usize) -> Result<HelperHandle> {
        if self.state != RunnerState::Idle {
            return Err(FlareError::RegistrationClosed);
        }
        if self.endpoints.contains_key(&agent_id) {
            return Err(FlareError::DuplicateAgent {
                task: self.name().to_string(),
                agent_id,
            });
        }

        let (handle, endpoint) = helper_pair(&self.settings, Arc::clone(&self.specs), agent_id);
        self.endpoints.insert(agent_id, endpoint);
        if self.endpoints.len() > self.settings.num_agents {
            warn!(
                "task `{}` now has {} helpers but declares num_agents = {}",
                self.name(),
                self.endpoints.len(),
                self.settings.num_agents
            );
        }
        Ok(handle)
    }

    /// Drop the helper of an agent that is being unregistered.
    pub fn remove_helper(&mut self, agent_id: usize) -> bool {
        self.endpoints.remove(&agent_id).is_some()
    }

    /// Checkpoint callback for the stats aggregator. `None` when checkpointing is disabled.
    pub fn model_saver(&self) -> Option<ModelSaveCallback> {
        let checkpointer = self.checkpointer.clone()?;
        let algorithm = Arc::clone(&self.algorithm);
        let pass = Arc::clone(&self.checkpoint_pass);
        Some(Box::new(move || {
            let pass = pass.load(Ordering::Acquire);
            let algorithm = algorithm.lock();
            checkpointer.lock().save(&**algorithm, pass)
        }))
    }

    /// Start the consumption loop.
    ///
    /// `flags` are the readiness flags of every registered agent; the loop
    /// drains and exits once all of them read `Stopped`.
    pub fn run(&mut self, flags: Vec<SharedReadiness>, events: Sender<CoordinatorMsg>) -> Result<()> {
        if self.state != RunnerState::Idle {
            return Err(FlareError::AlreadyStarted);
        }

        let endpoints: Vec<HelperEndpoint> = std::mem::take(&mut self.endpoints).into_values().collect();
        let ctx = LoopContext {
            settings: Arc::clone(&self.settings),
            algorithm: Arc::clone(&self.algorithm),
            stats: self.stats.clone(),
            stop: Arc::clone(&self.stop),
            updates: Arc::clone(&self.updates),
            base_pass: self.base_pass,
            checkpoint_pass: Arc::clone(&self.checkpoint_pass),
            checkpoints_enabled: self.checkpointer.is_some(),
            flags,
        };
        let name = self.name().to_string();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name(format!("task-{name}"))
            .spawn(move || {
                let result = ctx.consume(endpoints);
                let reason = match &result {
                    Ok(LoopExit::Drained) => FinishReason::Completed,
                    Ok(LoopExit::Stopped) => FinishReason::Stopped,
                    Err(e) => FinishReason::Failed(e.to_string()),
                };
                let _ = events.send(CoordinatorMsg::task_finished(name, reason));
                let _ = done_tx.send(());
                result.map(|_| ())
            })
            .map_err(FlareError::Spawn)?;

        self.worker = Some(TaskWorker { thread, done_rx });
        self.state = RunnerState::Running;
        Ok(())
    }

    /// Wait up to `timeout` for the loop to finish on its own.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        match &self.worker {
            Some(worker) => !matches!(worker.done_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)),
            None => true,
        }
    }

    /// Ask the loop to exit at its next safe point and wait for it. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.endpoints.clear();
        if let Some(worker) = self.worker.take() {
            self.outcome = Some(self.join(worker.thread));
        }
        self.state = RunnerState::Stopped;
        Ok(())
    }

    /// Like [`stop`](Self::stop), but gives up after `timeout` and leaves the
    /// thread detached.
    pub fn stop_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.stop.store(true, Ordering::Release);
        self.endpoints.clear();
        self.state = RunnerState::Stopped;

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.outcome = Some(self.join(worker.thread));
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(FlareError::ShutdownTimeout {
                component: format!("task `{}`", self.name()),
                timeout,
            }),
        }
    }

    /// Error the loop ended with, if any.
    pub fn failure(&self) -> Option<&FlareError> {
        match &self.outcome {
            Some(Err(e)) => Some(e),
            _ => None,
        }
    }

    pub fn take_failure(&mut self) -> Option<FlareError> {
        match self.outcome.take() {
            Some(Err(e)) => {
                self.outcome = Some(Ok(()));
                Some(e)
            }
            other => {
                self.outcome = other;
                None
            }
        }
    }

    fn join(&self, thread: JoinHandle<Result<()>>) -> Result<()> {
        match thread.join() {
            Ok(result) => result,
            Err(panic) => Err(FlareError::Algorithm {
                task: self.name().to_string(),
                message: panic_message(panic.as_ref()),
            }),
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.thread.join();
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.settings.name)
            .field("helpers", &self.endpoints.len())
            .field("updates", &self.updates())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// State moved into the consumption thread.
struct LoopContext {
    settings: Arc<ResolvedTaskSettings>,
    algorithm: SharedAlgorithm,
    stats: StatsSender,
    stop: Arc<AtomicBool>,
    updates: Arc<AtomicUsize>,
    base_pass: usize,
    checkpoint_pass: Arc<AtomicUsize>,
    checkpoints_enabled: bool,
    flags: Vec<SharedReadiness>,
}

impl LoopContext {
    fn consume(self, mut endpoints: Vec<HelperEndpoint>) -> Result<LoopExit> {
        let name = self.settings.name.as_str();
        let poll = self.settings.run.poll_interval();
        info!("task `{}` consuming from {} helpers", name, endpoints.len());

        loop {
            if self.stop.load(Ordering::Acquire) {
                debug!("task `{}` stop requested", name);
                return Ok(LoopExit::Stopped);
            }
            if all_stopped(&self.flags) && endpoints.iter().all(|e| !e.has_pending()) {
                info!("task `{}` drained after all agents stopped", name);
                return Ok(LoopExit::Drained);
            }
            if endpoints.is_empty() {
                std::thread::sleep(poll);
                continue;
            }

            let received = {
                let mut select = Select::new();
                for endpoint in &endpoints {
                    select.recv(&endpoint.rx);
                }
                match select.select_timeout(poll) {
                    Ok(op) => {
                        let index = op.index();
                        Some((index, op.recv(&endpoints[index].rx)))
                    }
                    Err(_) => None,
                }
            };

            match received {
                Some((index, Ok(msg))) => self.handle(&mut endpoints[index], msg)?,
                Some((index, Err(_))) => {
                    let closed = endpoints.remove(index);
                    debug!("task `{}`: agent {} closed its helper", name, closed.agent_id);
                }
                None => {}
            }
        }
    }

    fn handle(&self, endpoint: &mut HelperEndpoint, msg: HelperMsg) -> Result<()> {
        match msg {
            HelperMsg::Predict { inputs, states } => {
                let prediction = self
                    .algorithm
                    .lock()
                    .predict(&inputs, &states)
                    .map_err(|e| self.algorithm_error(e))?;
                if endpoint.reply_tx.send(prediction).is_err() {
                    debug!("agent {} left before its prediction arrived", endpoint.agent_id);
                }
            }
            HelperMsg::Record(transition) => endpoint.strategy.push(transition),
            HelperMsg::IntervalElapsed => {
                let Some(transitions) = endpoint.strategy.sample() else {
                    return Ok(());
                };
                self.learn(Batch::new(endpoint.agent_id, transitions))?;
            }
        }
        Ok(())
    }

    fn learn(&self, batch: Batch) -> Result<()> {
        let name = &self.settings.name;
        let outcome = self
            .algorithm
            .lock()
            .learn(&batch, &self.settings.hyperparams)
            .map_err(|e| self.algorithm_error(e))?;
        let updates = self.updates.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(
            "task `{}` update {} from agent {} ({} records)",
            name,
            updates,
            batch.agent_id,
            batch.len()
        );
        self.stats
            .submit(LogRecord::learn(name.as_str(), batch.agent_id, batch.len(), outcome.loss));

        let cadence = self.settings.run.model_save_interval;
        if self.checkpoints_enabled && updates % cadence == 0 {
            let pass = self.base_pass + updates / cadence;
            self.checkpoint_pass.store(pass, Ordering::Release);
            self.stats.submit(LogRecord::ModelSave {
                task: name.clone(),
                pass,
            });
        }
        Ok(())
    }

    fn algorithm_error(&self, e: AlgorithmError) -> FlareError {
        FlareError::Algorithm {
            task: self.settings.name.clone(),
            message: e.0,
        }
    }
}
