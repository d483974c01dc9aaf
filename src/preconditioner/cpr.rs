//! Constrained pressure residual (CPR) two-stage preconditioner.
//!
//! Stage one restricts the block residual to a scalar pressure system
//! through dynamically recomputed cell weights and solves it with an
//! algebraic multigrid cycle, capturing the global elliptic coupling.
//! Stage two applies a full-system smoother to the pressure-corrected
//! residual, resolving the local coupling of the remaining unknowns. The
//! update scheduler decides per call whether the multigrid hierarchy is
//! rebuilt, numerically refreshed, or left alone.

use crate::config::CprConfig;
use crate::context::{AdValue, ModelContext, Recorder};
use crate::core::traits::{LinearSystem, MatVec};
use crate::error::CprError;
use crate::preconditioner::pressure::PressureMatrix;
use crate::preconditioner::weights::compute_weights;
use crate::preconditioner::{
    BlockIlu0, FlexiblePreconditioner, Preconditioner, PressureSolver, SmoothedAggregationAmg,
};
use crate::solver::FgmresSolver;
use crate::utils::schedule::UpdateSchedule;
use log::debug;
use rayon::prelude::*;

use crate::matrix::block::BlockMatrix;

struct CprWorkspace {
    n_cells: usize,
    block_size: usize,
    a_p: PressureMatrix,
    weights: Vec<f64>,
    r_p: Vec<f64>,
    dp: Vec<f64>,
    buf: Vec<f64>,
}

impl CprWorkspace {
    fn allocate(jac: &BlockMatrix) -> Self {
        let n = jac.n_cells();
        let b = jac.block_size();
        Self {
            n_cells: n,
            block_size: b,
            a_p: PressureMatrix::with_pattern_of(jac),
            weights: vec![0.0; n * b],
            r_p: vec![0.0; n],
            dp: vec![0.0; n],
            buf: vec![0.0; n * b],
        }
    }
}

/// The CPR preconditioner. Construct once, `update` per linearization,
/// `apply` per Krylov iteration.
pub struct CprPreconditioner {
    pub config: CprConfig,
    pressure_solver: Box<dyn PressureSolver + Send>,
    smoother: Box<dyn Preconditioner<BlockMatrix> + Send>,
    work: Option<CprWorkspace>,
    fgmres: Option<FgmresSolver<f64>>,
}

impl CprPreconditioner {
    /// CPR with the default subsolvers: smoothed-aggregation AMG on the
    /// pressure system, block-ILU(0) on the full system.
    pub fn new(config: CprConfig) -> Self {
        Self::with_solvers(
            config,
            Box::new(SmoothedAggregationAmg::new()),
            Box::new(BlockIlu0::new()),
        )
    }

    /// CPR with caller-provided subsolvers.
    pub fn with_solvers(
        config: CprConfig,
        pressure_solver: Box<dyn PressureSolver + Send>,
        smoother: Box<dyn Preconditioner<BlockMatrix> + Send>,
    ) -> Self {
        Self { config, pressure_solver, smoother, work: None, fgmres: None }
    }

    /// Operator dimension `n_cells * block_size`; 0 before the first update.
    pub fn rows(&self) -> usize {
        self.work
            .as_ref()
            .map_or(0, |w| w.n_cells * w.block_size)
    }

    /// The extracted pressure matrix, once the first update has run.
    pub fn pressure_matrix(&self) -> Option<&PressureMatrix> {
        self.work.as_ref().map(|w| &w.a_p)
    }

    /// The current weight matrix (`block_size × n_cells`, column-major).
    pub fn weights(&self) -> Option<&[f64]> {
        self.work.as_ref().map(|w| w.weights.as_slice())
    }

    /// Refresh the preconditioner for the current linearization.
    ///
    /// The schedule classifies the call: a full update recomputes weights
    /// and pressure values and rebuilds both subsolvers from scratch; a
    /// partial update refreshes the pressure numerics without re-coarsening
    /// the multigrid hierarchy; otherwise only the full-system smoother is
    /// rebuilt. Idempotent for a fixed recorder state.
    pub fn update<S, A>(
        &mut self,
        sys: &S,
        ctx: &ModelContext<'_, A>,
        recorder: &dyn Recorder,
    ) -> Result<(), CprError>
    where
        S: LinearSystem + ?Sized,
        A: AdValue,
    {
        let jac = sys.reservoir_jacobian();
        let first = self.work.is_none();
        if first {
            self.work = Some(CprWorkspace::allocate(jac));
        }
        let work = self.work.as_mut().unwrap();
        if work.a_p.nnz() != jac.nnz() || work.n_cells != jac.n_cells() {
            return Err(CprError::DimensionMismatch {
                expected: work.a_p.nnz(),
                found: jac.nnz(),
            });
        }

        let amg_schedule =
            UpdateSchedule::new(self.config.update_interval, self.config.update_frequency);
        let partial_schedule = UpdateSchedule::new(
            self.config.update_interval_partial,
            self.config.update_frequency_partial,
        );
        let full = amg_schedule.should_update(recorder, first);
        let partial = !full
            && self.config.partial_update
            && partial_schedule.should_update(recorder, first);

        if full || partial {
            compute_weights(
                &mut work.weights,
                jac,
                &self.config.strategy,
                self.config.weight_scaling,
                ctx,
                self.config.min_batch,
            )?;
            work.a_p
                .rebuild_values(jac, &work.weights, self.config.min_batch)?;
        }
        // The smoother tracks every linearization regardless of schedule.
        self.smoother.setup(jac)?;
        if full {
            debug!("cpr update: full pressure-hierarchy rebuild");
            self.pressure_solver.setup(&work.a_p)?;
        } else if partial {
            debug!("cpr update: partial pressure refresh");
            self.pressure_solver.partial_refresh(&work.a_p)?;
        }
        Ok(())
    }

    /// Two-stage application: `x ≈ M⁻¹ r`.
    ///
    /// `a` is the full-system operator of the system last passed to
    /// `update`; it is borrowed for this call only.
    pub fn apply(
        &mut self,
        a: &dyn MatVec<[f64]>,
        x: &mut [f64],
        r: &[f64],
    ) -> Result<(), CprError> {
        let work = self
            .work
            .as_mut()
            .ok_or_else(|| CprError::SolveError("cpr apply before update".to_string()))?;
        let n = work.n_cells;
        let b = work.block_size;
        let min_batch = self.config.min_batch;
        assert_eq!(x.len(), n * b);
        assert_eq!(r.len(), n * b);

        // 1. Restrict the block residual through the weights
        {
            let weights = &work.weights;
            work.r_p
                .par_iter_mut()
                .enumerate()
                .with_min_len(min_batch)
                .for_each(|(i, rp)| {
                    let rc = &r[i * b..(i + 1) * b];
                    let wc = &weights[i * b..(i + 1) * b];
                    let mut sum = 0.0;
                    for j in 0..b {
                        sum += rc[j] * wc[j];
                    }
                    *rp = sum;
                });
        }

        // 2. Pressure solve: Δp ≈ A_p⁻¹ r_p
        if let Some(rtol) = self.config.pressure_rtol {
            let fgmres = self
                .fgmres
                .get_or_insert_with(|| FgmresSolver::new(rtol, 1e-12, 20, 20));
            let mut flex = PressureApply { inner: self.pressure_solver.as_ref() };
            // Warm start from the previous Δp; non-convergence is
            // best-effort, not an error.
            let _ = fgmres.solve(&work.a_p, Some(&mut flex), &work.r_p, &mut work.dp)?;
        } else {
            self.pressure_solver.apply(&work.r_p, &mut work.dp)?;
        }

        // 3. Lift Δp into the pressure slots and correct: buf = r − A·lift(Δp)
        {
            let dp = &work.dp;
            x.par_chunks_mut(b)
                .enumerate()
                .with_min_len(min_batch)
                .for_each(|(i, xc)| {
                    xc.fill(0.0);
                    xc[0] = dp[i];
                });
        }
        a.matvec(x, &mut work.buf);
        work.buf
            .par_iter_mut()
            .zip(r.par_iter())
            .with_min_len(min_batch)
            .for_each(|(bi, ri)| *bi = ri - *bi);

        // 4. Full-system smoothing: x = S⁻¹ buf
        self.smoother.apply(&work.buf, x)?;

        // 5. Increment the pressure component
        {
            let dp = &work.dp;
            x.par_chunks_mut(b)
                .enumerate()
                .with_min_len(min_batch)
                .for_each(|(i, xc)| {
                    xc[0] += dp[i];
                });
        }
        Ok(())
    }
}

/// AMG viewed as a (fixed) flexible preconditioner for the inner FGMRES.
struct PressureApply<'a> {
    inner: &'a (dyn PressureSolver + Send),
}

impl FlexiblePreconditioner<[f64]> for PressureApply<'_> {
    fn apply(&mut self, r: &[f64], z: &mut [f64]) -> Result<(), CprError> {
        self.inner.apply(r, z)
    }
}
