//! Convergence tracking & tolerance checks for iterative solvers.

use num_traits::Float;

/// Stopping criteria & stats.
pub struct Convergence<T> {
    pub rtol: T,
    pub atol: T,
    pub max_iters: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = if res0_norm > T::zero() { res_norm / res0_norm } else { T::zero() };
        let converged = rel <= self.rtol || res_norm <= self.atol;
        let stop = converged || i >= self.max_iters;
        (
            stop,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }
}
