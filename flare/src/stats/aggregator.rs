//! Single-consumer statistics loop.
//!
//! Producers (agents and tasks) hold cheap [`StatsSender`] clones and never
//! block: the queue is unbounded. One thread folds records into
//! [`RunStatistics`], emits a progress summary every `print_interval`
//! records and runs every registered model saver on each checkpoint signal.

use super::logger::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, ProgressSnapshot};
use super::statistics::RunStatistics;
use crate::checkpoint::CheckpointError;
use crate::error::{FlareError, Result};
use crate::messages::LogRecord;
use crate::task::RunSettings;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Persists one task's algorithm; invoked from the aggregator thread.
pub type ModelSaveCallback = Box<dyn Fn() -> std::result::Result<PathBuf, CheckpointError> + Send>;

/// Producer side of the aggregator queue.
#[derive(Clone)]
pub struct StatsSender {
    tx: Sender<LogRecord>,
}

impl StatsSender {
    /// Enqueue a record. Returns `false` once the aggregator is gone.
    pub fn submit(&self, record: LogRecord) -> bool {
        self.tx.send(record).is_ok()
    }
}

impl std::fmt::Debug for StatsSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsSender").field("queued", &self.tx.len()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AggregatorState {
    Idle,
    Running,
    Stopped,
}

struct AggregatorWorker {
    thread: JoinHandle<RunStatistics>,
    done_rx: Receiver<()>,
}

/// Owner of the statistics thread.
pub struct StatsAggregator {
    print_interval: usize,
    poll_interval: Duration,
    tx: Sender<LogRecord>,
    rx: Receiver<LogRecord>,
    savers: BTreeMap<String, ModelSaveCallback>,
    logger: Box<dyn MetricsLogger>,
    stop: Arc<AtomicBool>,
    worker: Option<AggregatorWorker>,
    statistics: Option<RunStatistics>,
    state: AggregatorState,
}

impl StatsAggregator {
    /// Console summaries, plus CSV rows when `log_file` is set.
    pub fn new(settings: &RunSettings) -> Self {
        let mut logger = MultiLogger::new().add(ConsoleLogger::new());
        if let Some(path) = &settings.log_file {
            match CsvLogger::new(path) {
                Ok(csv) => logger.push(Box::new(csv)),
                Err(e) => warn!("cannot open log file {}: {}", path.display(), e),
            }
        }
        Self::with_logger(settings, Box::new(logger))
    }

    /// Use `logger` as the only summary sink.
    pub fn with_logger(settings: &RunSettings, logger: Box<dyn MetricsLogger>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            print_interval: settings.print_interval.max(1),
            poll_interval: settings.poll_interval(),
            tx,
            rx,
            savers: BTreeMap::new(),
            logger,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
            statistics: None,
            state: AggregatorState::Idle,
        }
    }

    pub fn sender(&self) -> StatsSender {
        StatsSender { tx: self.tx.clone() }
    }

    /// Records waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    pub fn is_running(&self) -> bool {
        self.state == AggregatorState::Running
    }

    /// Run `saver` on every checkpoint signal. Only before `start`.
    pub fn register_model_saver(&mut self, task: impl Into<String>, saver: ModelSaveCallback) -> Result<()> {
        if self.state != AggregatorState::Idle {
            return Err(FlareError::RegistrationClosed);
        }
        self.savers.insert(task.into(), saver);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != AggregatorState::Idle {
            return Err(FlareError::AlreadyStarted);
        }

        let consumer = self.take_consumer();
        let rx = self.rx.clone();
        let stop = Arc::clone(&self.stop);
        let poll = self.poll_interval;
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let thread = std::thread::Builder::new()
            .name("stats-aggregator".to_string())
            .spawn(move || {
                let stats = consumer.run(&rx, &stop, poll);
                let _ = done_tx.send(());
                stats
            })
            .map_err(FlareError::Spawn)?;

        self.worker = Some(AggregatorWorker { thread, done_rx });
        self.state = AggregatorState::Running;
        Ok(())
    }

    /// Drain every queued record, then stop. Idempotent.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            AggregatorState::Stopped => Ok(()),
            AggregatorState::Idle => {
                let mut consumer = self.take_consumer();
                consumer.drain(&self.rx);
                self.statistics = Some(consumer.finish());
                self.state = AggregatorState::Stopped;
                Ok(())
            }
            AggregatorState::Running => {
                self.stop.store(true, Ordering::Release);
                self.state = AggregatorState::Stopped;
                if let Some(worker) = self.worker.take() {
                    self.statistics = Some(join(worker.thread));
                }
                Ok(())
            }
        }
    }

    /// Like [`stop`](Self::stop), but gives up after `timeout`.
    pub fn stop_timeout(&mut self, timeout: Duration) -> Result<()> {
        if self.state != AggregatorState::Running {
            return self.stop();
        }
        self.stop.store(true, Ordering::Release);
        self.state = AggregatorState::Stopped;

        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        match worker.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.statistics = Some(join(worker.thread));
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(FlareError::ShutdownTimeout {
                component: "stats aggregator".to_string(),
                timeout,
            }),
        }
    }

    /// Final statistics; `Some` exactly once, after `stop`.
    pub fn take_statistics(&mut self) -> Option<RunStatistics> {
        self.statistics.take()
    }

    fn take_consumer(&mut self) -> Consumer {
        let logger = std::mem::replace(&mut self.logger, Box::new(MultiLogger::new()));
        Consumer {
            stats: RunStatistics::new(),
            savers: std::mem::take(&mut self.savers),
            logger,
            print_interval: self.print_interval,
        }
    }
}

impl Drop for StatsAggregator {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.thread.join();
        }
    }
}

fn join(thread: JoinHandle<RunStatistics>) -> RunStatistics {
    match thread.join() {
        Ok(stats) => stats,
        Err(_) => {
            warn!("stats aggregator panicked; statistics are lost");
            RunStatistics::new()
        }
    }
}

/// State owned by the aggregator thread.
struct Consumer {
    stats: RunStatistics,
    savers: BTreeMap<String, ModelSaveCallback>,
    logger: Box<dyn MetricsLogger>,
    print_interval: usize,
}

impl Consumer {
    fn run(mut self, rx: &Receiver<LogRecord>, stop: &AtomicBool, poll: Duration) -> RunStatistics {
        debug!("stats aggregator started");
        loop {
            match rx.recv_timeout(poll) {
                Ok(record) => self.consume(record),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if stop.load(Ordering::Acquire) {
                self.drain(rx);
                break;
            }
        }
        self.finish()
    }

    fn drain(&mut self, rx: &Receiver<LogRecord>) {
        while let Ok(record) = rx.try_recv() {
            self.consume(record);
        }
    }

    fn consume(&mut self, record: LogRecord) {
        self.stats.apply(&record);
        if let LogRecord::ModelSave { task, pass } = &record {
            self.save_all(task, *pass);
        }
        if self.stats.records % self.print_interval == 0 {
            self.summarize();
        }
    }

    fn save_all(&mut self, signalled_by: &str, pass: usize) {
        if self.savers.is_empty() {
            debug!("checkpoint signal from `{}` (pass {}) with no model savers", signalled_by, pass);
            return;
        }
        for (task, saver) in &self.savers {
            match saver() {
                Ok(path) => {
                    info!("task `{}` saved to {} (signal from `{}`, pass {})", task, path.display(), signalled_by, pass);
                    self.stats.record_checkpoint(task, Some(path));
                }
                Err(e) => {
                    warn!("task `{}` failed to save: {}", task, e);
                    self.stats.record_checkpoint(task, None);
                }
            }
        }
    }

    fn summarize(&mut self) {
        self.stats.summaries += 1;
        let snapshot = ProgressSnapshot::from_stats(self.stats.summaries, &self.stats);
        self.logger.log(&snapshot);
    }

    fn finish(mut self) -> RunStatistics {
        self.logger.flush();
        debug!(
            "stats aggregator stopped after {} records ({} summaries)",
            self.stats.records, self.stats.summaries
        );
        self.stats
    }
}
