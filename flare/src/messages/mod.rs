//! Message types passed between components.
//!
//! # Architecture
//!
//! ```text
//!    +----------+   HelperMsg    +--------------+
//!    | Agent N  | -------------> | TaskRunner   |
//!    +----------+  (per pair)    +--------------+
//!      |     |                      |       |
//!      |     |      LogRecord       v       |
//!      |     +-------------> +-----------------+
//!      |                     | StatsAggregator |
//!      |                     +-----------------+
//!      |   CoordinatorMsg                   |
//!      +-------------> +-------------+ <----+
//!                      | Coordinator |
//!                      +-------------+
//! ```

mod coordinator_msg;
mod helper_msg;
mod log_record;


pub use coordinator_msg::{CoordinatorMsg, FinishReason};
pub use helper_msg::HelperMsg;
pub use log_record::{EpisodeLog, LearnLog, LogRecord};
