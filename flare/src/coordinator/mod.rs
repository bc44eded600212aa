//! Run orchestration: task creation, agent registration, startup barrier
//! and shutdown.

mod interrupt;
mod manager;

#[cfg(test)]
mod tests;

pub use interrupt::InterruptHandle;
pub use manager::Coordinator;
