//! Agent workers.
//!
//! Each agent owns one environment and runs on its own thread. It only ever
//! touches its own environment and its own helper handles.

mod worker;


pub use worker::{AgentConfig, AgentHandle, AgentWorker};
