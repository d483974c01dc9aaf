//! Inner Krylov solver for the pressure subsystem.

pub mod fgmres;
pub use fgmres::FgmresSolver;
