//! Progress summary sinks.

use super::statistics::RunStatistics;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// One progress summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Summary sequence number (1-based).
    pub summary: usize,
    pub records: usize,
    pub total_steps: usize,
    pub episodes: usize,
    pub avg_reward: f32,
    pub updates: usize,
    pub checkpoints: usize,
}

impl ProgressSnapshot {
    pub fn from_stats(summary: usize, stats: &RunStatistics) -> Self {
        Self {
            summary,
            records: stats.records,
            total_steps: stats.total_steps,
            episodes: stats.episodes,
            avg_reward: stats.avg_episode_reward,
            updates: stats.updates,
            checkpoints: stats.checkpoints_saved(),
        }
    }
}

/// Destination for progress summaries.
pub trait MetricsLogger: Send {
    fn log(&mut self, snapshot: &ProgressSnapshot);

    fn flush(&mut self);
}

/// Fixed-width table on stdout.
pub struct ConsoleLogger {
    start_time: Instant,
    show_header: bool,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            show_header: true,
        }
    }

    fn print_header(&self) {
        println!(
            "{:>8} {:>10} {:>10} {:>8} {:>10} {:>8} {:>6} {:>8}",
            "Summary", "Records", "EnvSteps", "Episodes", "Reward", "Updates", "Ckpts", "SPS"
        );
        println!("{}", "-".repeat(76));
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLogger for ConsoleLogger {
    fn log(&mut self, snapshot: &ProgressSnapshot) {
        if self.show_header {
            self.print_header();
            self.show_header = false;
        }

        let elapsed = self.start_time.elapsed().as_secs_f32();
        let sps = if elapsed > 0.0 {
            snapshot.total_steps as f32 / elapsed
        } else {
            0.0
        };

        println!(
            "{:>8} {:>10} {:>10} {:>8} {:>10.3} {:>8} {:>6} {:>8.0}",
            snapshot.summary,
            snapshot.records,
            snapshot.total_steps,
            snapshot.episodes,
            snapshot.avg_reward,
            snapshot.updates,
            snapshot.checkpoints,
            sps
        );
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().flush();
    }
}

/// One CSV row per summary.
pub struct CsvLogger {
    writer: BufWriter<File>,
    start_time: Instant,
}

impl CsvLogger {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            "summary,records,env_steps,episodes,avg_reward,updates,checkpoints,elapsed_secs"
        )?;
        Ok(Self {
            writer,
            start_time: Instant::now(),
        })
    }
}

impl MetricsLogger for CsvLogger {
    fn log(&mut self, snapshot: &ProgressSnapshot) {
        let elapsed = self.start_time.elapsed().as_secs_f32();
        if let Err(e) = writeln!(
            self.writer,
            "{},{},{},{},{:.4},{},{},{:.2}",
            snapshot.summary,
            snapshot.records,
            snapshot.total_steps,
            snapshot.episodes,
            snapshot.avg_reward,
            snapshot.updates,
            snapshot.checkpoints,
            elapsed
        ) {
            log::warn!("failed to write progress row: {}", e);
        }
    }

    fn flush(&mut self) {
        let _ = self.writer.flush();
    }
}

impl Drop for CsvLogger {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Fan-out to several sinks.
#[derive(Default)]
pub struct MultiLogger {
    loggers: Vec<Box<dyn MetricsLogger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<L: MetricsLogger + 'static>(mut self, logger: L) -> Self {
        self.loggers.push(Box::new(logger));
        self
    }

    pub fn push(&mut self, logger: Box<dyn MetricsLogger>) {
        self.loggers.push(logger);
    }

    pub fn len(&self) -> usize {
        self.loggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.is_empty()
    }
}

impl MetricsLogger for MultiLogger {
    fn log(&mut self, snapshot: &ProgressSnapshot) {
        for logger in &mut self.loggers {
            logger.log(snapshot);
        }
    }

    fn flush(&mut self) {
        for logger in &mut self.loggers {
            logger.flush();
        }
    }
}
