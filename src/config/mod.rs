//! Configuration for the CPR preconditioner.

pub mod options;
pub use options::CprConfig;
