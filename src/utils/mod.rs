//! Shared utilities: convergence checks and update scheduling.

pub mod convergence;
pub mod schedule;

pub use convergence::{Convergence, SolveStats};
pub use schedule::{UpdateInterval, UpdateSchedule};
