//! Parameter checkpointing for computation tasks.
//!
//! ## Features
//!
//! - One directory per task, one file per pass (`pass-00012.ckpt`)
//! - Resume from a given pass or from the latest one
//! - Optional cleanup keeping only the last N checkpoints
//!
//! ## Example
//!
//! ```rust,ignore
//! use flare::checkpoint::{Checkpointer, CheckpointerConfig};
//!
//! let mut checkpointer = Checkpointer::new(CheckpointerConfig::new("./models/rl").with_keep_last_n(5))?;
//! checkpointer.save(algorithm.as_ref(), pass)?;
//!
//! // Resume:
//! let info = checkpointer.load_latest(algorithm.as_mut())?;
//! ```

pub mod checkpointer;

pub use checkpointer::{CheckpointError, CheckpointInfo, Checkpointer, CheckpointerConfig};
