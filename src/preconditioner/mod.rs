//! Preconditioners: the CPR two-stage composition and its subsolvers.

use crate::error::CprError;
use crate::preconditioner::pressure::PressureMatrix;

/// A preconditioner M ≈ A⁻¹ for the full block system.
pub trait Preconditioner<M> {
    /// Setup/factorize from A.
    fn setup(&mut self, a: &M) -> Result<(), CprError>;
    /// Apply M⁻¹ to r, writing z = M⁻¹ r.
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), CprError>;
}

/// A preconditioner whose action M⁻¹ may change at every iteration.
pub trait FlexiblePreconditioner<V: ?Sized> {
    /// Given the current residual `r`, produce `z ≈ Mₖ⁻¹ r`.
    fn apply(&mut self, r: &V, z: &mut V) -> Result<(), CprError>;
}

/// Solver for the scalar pressure subsystem.
///
/// `setup` rebuilds everything; `partial_refresh` may reuse structural
/// decisions (e.g. a multigrid coarsening) and only refresh numerics.
/// `apply` overwrites `z` with one application of the solver to `r`.
pub trait PressureSolver {
    fn setup(&mut self, a: &PressureMatrix) -> Result<(), CprError>;
    fn partial_refresh(&mut self, a: &PressureMatrix) -> Result<(), CprError>;
    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), CprError>;
}

pub mod amg;
pub mod bilu;
pub mod cpr;
pub mod pressure;
pub mod weights;

pub use amg::SmoothedAggregationAmg;
pub use bilu::BlockIlu0;
pub use cpr::CprPreconditioner;
pub use weights::{WeightScaling, WeightStrategy};
