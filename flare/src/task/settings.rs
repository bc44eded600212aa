//! Run-wide and per-task configuration.
//!
//! Tasks are described by a declarative [`TaskOptions`] (serde-friendly, all
//! fields optional) plus the algorithm handle. [`TaskOptions::resolve`]
//! checks required fields once and merges the run-wide [`RunSettings`] into
//! an immutable [`ResolvedTaskSettings`].

use crate::algorithm::{Algorithm, Hyperparams};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default per-helper queue capacity (records in flight per agent/task pair).
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How a task groups one agent's records into learning batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplingKind {
    /// Learn from exactly the records written since the last interval.
    #[default]
    OnPolicy,
    /// Keep a bounded replay memory and learn from uniform minibatches.
    ExperienceReplay {
        capacity: usize,
        batch_size: usize,
        #[serde(default)]
        warmup: usize,
    },
}

/// Run-wide settings shared by every task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Records consumed between progress summaries
    pub print_interval: usize,
    /// Checkpoint root (None = checkpointing disabled)
    pub model_dir: Option<PathBuf>,
    /// Learning updates between checkpoints
    pub model_save_interval: usize,
    /// Restore parameters from `model_dir` before serving
    pub load_model: bool,
    /// Pass counter to resume from (0 with `load_model` = latest checkpoint)
    pub pass_num: usize,
    /// Optional CSV file receiving progress summaries
    pub log_file: Option<PathBuf>,
    /// Checkpoints kept per task (0 = keep all)
    pub keep_last_n: usize,
    /// Per-component shutdown budget on the interrupt path
    pub shutdown_timeout_ms: u64,
    /// Bounded wait used by polling loops
    pub poll_interval_ms: u64,
    /// Install the process interrupt handler at start
    pub install_interrupt_handler: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            print_interval: 100,
            model_dir: None,
            model_save_interval: 10,
            load_model: false,
            pass_num: 0,
            log_file: None,
            keep_last_n: 0,
            shutdown_timeout_ms: 5_000,
            poll_interval_ms: 50,
            install_interrupt_handler: true,
        }
    }
}

impl RunSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_print_interval(mut self, interval: usize) -> Self {
        self.print_interval = interval;
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn with_model_save_interval(mut self, interval: usize) -> Self {
        self.model_save_interval = interval;
        self
    }

    /// Resume from the checkpoint saved at `pass_num` (0 = latest).
    pub fn with_resume(mut self, pass_num: usize) -> Self {
        self.load_model = true;
        self.pass_num = pass_num;
        self
    }

    pub fn with_pass_num(mut self, pass_num: usize) -> Self {
        self.pass_num = pass_num;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = saturating_millis(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = saturating_millis(interval);
        self
    }

    pub fn with_interrupt_handler(mut self, install: bool) -> Self {
        self.install_interrupt_handler = install;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the run-wide fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("print_interval", self.print_interval),
            ("model_save_interval", self.model_save_interval),
            ("shutdown_timeout_ms", self.shutdown_timeout_ms as usize),
            ("poll_interval_ms", self.poll_interval_ms as usize),
        ];
        for (field, value) in counts {
            if value == 0 {
                return Err(ConfigError::InvalidCount {
                    task: "run".to_string(),
                    field,
                    value,
                });
            }
        }
        Ok(())
    }
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Declarative part of a task's settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub hyperparams: Hyperparams,
    pub sampling: SamplingKind,
    /// Records per agent between learning updates (required)
    pub sample_interval: Option<usize>,
    /// Expected number of agents (required)
    pub num_agents: Option<usize>,
    /// Capacity of each helper queue (default [`DEFAULT_QUEUE_CAPACITY`])
    pub queue_capacity: Option<usize>,
}

impl TaskOptions {
    /// Check required fields and merge run-wide settings.
    pub fn resolve(&self, task: &str, run: &RunSettings) -> Result<ResolvedTaskSettings, ConfigError> {
        let sample_interval = required(task, "sample_interval", self.sample_interval)?;
        let num_agents = required(task, "num_agents", self.num_agents)?;
        let queue_capacity = self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        positive(task, "queue_capacity", queue_capacity)?;

        if let SamplingKind::ExperienceReplay {
            capacity,
            batch_size,
            ..
        } = self.sampling
        {
            positive(task, "capacity", capacity)?;
            positive(task, "batch_size", batch_size)?;
            if batch_size > capacity {
                return Err(ConfigError::Invalid {
                    task: task.to_string(),
                    reason: format!("batch_size ({batch_size}) exceeds replay capacity ({capacity})"),
                });
            }
        }

        Ok(ResolvedTaskSettings {
            name: task.to_string(),
            hyperparams: self.hyperparams.clone(),
            sampling: self.sampling.clone(),
            sample_interval,
            num_agents,
            queue_capacity,
            run: run.clone(),
        })
    }
}

fn required(task: &str, field: &'static str, value: Option<usize>) -> Result<usize, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingField {
        task: task.to_string(),
        field,
    })?;
    positive(task, field, value)?;
    Ok(value)
}

fn positive(task: &str, field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidCount {
            task: task.to_string(),
            field,
            value,
        });
    }
    Ok(())
}

/// Settings bundle handed to the coordinator for one named task.
pub struct TaskSettings {
    pub algorithm: Box<dyn Algorithm>,
    pub options: TaskOptions,
}

impl TaskSettings {
    pub fn new(algorithm: Box<dyn Algorithm>, options: TaskOptions) -> Self {
        Self { algorithm, options }
    }

    /// Check required fields without building anything.
    pub fn validate(&self, task: &str, run: &RunSettings) -> Result<(), ConfigError> {
        self.options.resolve(task, run).map(|_| ())
    }

    pub fn builder(algorithm: impl Algorithm + 'static) -> TaskSettingsBuilder {
        TaskSettingsBuilder {
            algorithm: Box::new(algorithm),
            options: TaskOptions::default(),
        }
    }
}

impl std::fmt::Debug for TaskSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSettings")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TaskSettings`].
pub struct TaskSettingsBuilder {
    algorithm: Box<dyn Algorithm>,
    options: TaskOptions,
}

impl TaskSettingsBuilder {
    pub fn with_hyperparams(mut self, hyperparams: Hyperparams) -> Self {
        self.options.hyperparams = hyperparams;
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingKind) -> Self {
        self.options.sampling = sampling;
        self
    }

    pub fn with_sample_interval(mut self, interval: usize) -> Self {
        self.options.sample_interval = Some(interval);
        self
    }

    pub fn with_num_agents(mut self, n: usize) -> Self {
        self.options.num_agents = Some(n);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.options.queue_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> TaskSettings {
        TaskSettings::new(self.algorithm, self.options)
    }
}

/// Validated, immutable settings of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTaskSettings {
    pub name: String,
    pub hyperparams: Hyperparams,
    pub sampling: SamplingKind,
    pub sample_interval: usize,
    pub num_agents: usize,
    pub queue_capacity: usize,
    pub run: RunSettings,
}
