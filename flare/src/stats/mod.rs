//! Run statistics and progress output.
//!
//! - [`StatsAggregator`]: owns the consumer thread and the final [`RunStatistics`]
//! - [`StatsSender`]: non-blocking producer handle given to agents and tasks
//! - [`MetricsLogger`] sinks: [`ConsoleLogger`], [`CsvLogger`], [`MultiLogger`]

mod aggregator;
mod logger;
mod statistics;


pub use aggregator::{ModelSaveCallback, StatsAggregator, StatsSender};
pub use logger::{ConsoleLogger, CsvLogger, MetricsLogger, MultiLogger, ProgressSnapshot};
pub use statistics::{AgentSummary, RunStatistics, TaskSummary};
