//! Per-cell pressure-extraction weights.
//!
//! Each cell contributes one weight vector `w ∈ ℝᵇ`; restricting the block
//! residual through it produces the scalar pressure residual, and
//! projecting each Jacobian block's pressure column onto it produces the
//! pressure matrix. The strategies differ only in which cell-local `b × b`
//! system is inverted to get `w`.

use crate::context::{AdValue, ModelContext};
use crate::error::CprError;
use crate::matrix::block::BlockMatrix;
use crate::matrix::small;
use rayon::prelude::*;
use std::str::FromStr;

/// Weight-computation strategy.
pub enum WeightStrategy {
    /// Invert the (transposed) diagonal block of the Jacobian.
    QuasiImpes,
    /// Invert the accumulation-term Jacobian (mass-storage coupling only);
    /// requires the caller to supply accumulation derivatives.
    TrueImpes,
    /// Caller-provided closure fills the `b × n` column-major weight slice
    /// directly from physical state.
    Analytical(Box<dyn Fn(&mut [f64], usize, usize) + Send + Sync>),
    /// Select the first equation: `w = e₁` for every cell.
    None,
}

impl FromStr for WeightStrategy {
    type Err = CprError;
    fn from_str(s: &str) -> Result<Self, CprError> {
        match s {
            "quasi_impes" => Ok(WeightStrategy::QuasiImpes),
            "true_impes" => Ok(WeightStrategy::TrueImpes),
            "none" => Ok(WeightStrategy::None),
            other => Err(CprError::UnsupportedStrategy(other.to_string())),
        }
    }
}

/// Post-solve normalization of each weight column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightScaling {
    /// `w ← w / ‖w‖₂`
    #[default]
    Unit,
    /// Leave the solve result untouched.
    None,
}

impl FromStr for WeightScaling {
    type Err = CprError;
    fn from_str(s: &str) -> Result<Self, CprError> {
        match s {
            "unit" => Ok(WeightScaling::Unit),
            "none" => Ok(WeightScaling::None),
            other => Err(CprError::UnsupportedStrategy(other.to_string())),
        }
    }
}

/// Fill `w` (`b × n` column-major) for every cell. Cells are independent;
/// the loop fans out over rayon with `min_batch` as the smallest work unit
/// and per-thread scratch for the dense solves.
pub fn compute_weights<A: AdValue>(
    w: &mut [f64],
    jac: &BlockMatrix,
    strategy: &WeightStrategy,
    scaling: WeightScaling,
    ctx: &ModelContext<'_, A>,
    min_batch: usize,
) -> Result<(), CprError> {
    let n = jac.n_cells();
    let b = jac.block_size();
    assert_eq!(w.len(), n * b);
    match strategy {
        WeightStrategy::QuasiImpes => {
            w.par_chunks_mut(b)
                .enumerate()
                .with_min_len(min_batch)
                .try_for_each_init(
                    || vec![0.0; b * b],
                    |scratch, (cell, wc)| {
                        if !jac.diagonal_block_into(cell, scratch) {
                            return Err(CprError::WeightSolveFailure { cell });
                        }
                        // The block is stored column-major; reading it
                        // row-major is exactly the transpose the solve wants.
                        wc.fill(0.0);
                        wc[0] = 1.0;
                        if !small::solve_in_place(scratch, wc, b) {
                            return Err(CprError::WeightSolveFailure { cell });
                        }
                        scale_column(wc, scaling);
                        Ok(())
                    },
                )
        }
        WeightStrategy::TrueImpes => {
            let acc = ctx.accumulation.ok_or_else(|| {
                CprError::UnsupportedStrategy(
                    "true_impes requires an accumulation term".to_string(),
                )
            })?;
            assert_eq!(acc.len(), n * b);
            let p_scale = ctx.pressure_scale;
            w.par_chunks_mut(b)
                .enumerate()
                .with_min_len(min_batch)
                .try_for_each_init(
                    || vec![0.0; b * b],
                    |scratch, (cell, wc)| {
                        let acc_c = &acc[cell * b..(cell + 1) * b];
                        // Row 0 carries the pressure derivative, scaled so
                        // the pressure column stays comparable to the
                        // saturation/composition columns.
                        for (j, a) in acc_c.iter().enumerate() {
                            scratch[j] = p_scale * a.partial(0);
                        }
                        for i in 1..b {
                            for (j, a) in acc_c.iter().enumerate() {
                                scratch[i * b + j] = a.partial(i);
                            }
                        }
                        wc.fill(0.0);
                        wc[0] = 1.0;
                        if !small::solve_in_place(scratch, wc, b) {
                            return Err(CprError::WeightSolveFailure { cell });
                        }
                        scale_column(wc, scaling);
                        Ok(())
                    },
                )
        }
        WeightStrategy::Analytical(f) => {
            f(w, n, b);
            if scaling == WeightScaling::Unit {
                w.par_chunks_mut(b)
                    .with_min_len(min_batch)
                    .for_each(|wc| scale_column(wc, scaling));
            }
            Ok(())
        }
        WeightStrategy::None => {
            w.par_chunks_mut(b)
                .with_min_len(min_batch)
                .for_each(|wc| {
                    wc.fill(0.0);
                    wc[0] = 1.0;
                });
            Ok(())
        }
    }
}

fn scale_column(wc: &mut [f64], scaling: WeightScaling) {
    if scaling == WeightScaling::Unit {
        let nrm = wc.iter().map(|v| v * v).sum::<f64>().sqrt();
        if nrm > 0.0 {
            for v in wc.iter_mut() {
                *v /= nrm;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AdScalar;
    use crate::matrix::block::BlockCsrMatrix;

    // Single cell, b = 2, diagonal block [[2,1],[1,3]]
    fn one_cell_jacobian() -> BlockMatrix {
        // Column-major storage of [[2,1],[1,3]]
        let blocks = vec![2.0, 1.0, 1.0, 3.0];
        BlockMatrix::Csr(BlockCsrMatrix::from_csr(1, 2, vec![0, 1], vec![0], blocks))
    }

    #[test]
    fn quasi_impes_reference_cell() {
        // Solve [[2,1],[1,3]] w = [1,0]  =>  w = [0.6, -0.2]
        let jac = one_cell_jacobian();
        let mut w = vec![0.0; 2];
        compute_weights(
            &mut w,
            &jac,
            &WeightStrategy::QuasiImpes,
            WeightScaling::None,
            &ModelContext::empty(),
            1,
        )
        .unwrap();
        assert!((w[0] - 0.6).abs() < 1e-14);
        assert!((w[1] + 0.2).abs() < 1e-14);
    }

    #[test]
    fn quasi_impes_unit_scaling() {
        let jac = one_cell_jacobian();
        let mut w = vec![0.0; 2];
        compute_weights(
            &mut w,
            &jac,
            &WeightStrategy::QuasiImpes,
            WeightScaling::Unit,
            &ModelContext::empty(),
            1,
        )
        .unwrap();
        assert!((w[0] - 0.9486832980505138).abs() < 1e-12);
        assert!((w[1] + 0.31622776601683794).abs() < 1e-12);
        let nrm = (w[0] * w[0] + w[1] * w[1]).sqrt();
        assert!((nrm - 1.0).abs() < 1e-14);
    }

    #[test]
    fn singular_diagonal_is_reported() {
        let blocks = vec![1.0, 2.0, 2.0, 4.0]; // rank-1 block
        let jac = BlockMatrix::Csr(BlockCsrMatrix::from_csr(1, 2, vec![0, 1], vec![0], blocks));
        let mut w = vec![0.0; 2];
        let err = compute_weights(
            &mut w,
            &jac,
            &WeightStrategy::QuasiImpes,
            WeightScaling::Unit,
            &ModelContext::empty(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, CprError::WeightSolveFailure { cell: 0 }));
    }

    #[test]
    fn none_selects_first_equation() {
        let jac = one_cell_jacobian();
        let mut w = vec![9.0; 2];
        compute_weights(
            &mut w,
            &jac,
            &WeightStrategy::None,
            WeightScaling::Unit,
            &ModelContext::empty(),
            1,
        )
        .unwrap();
        assert_eq!(w, vec![1.0, 0.0]);
    }

    #[test]
    fn true_impes_uses_accumulation_partials() {
        // acc partials per equation give M = [[p_scale*2, p_scale*0], [1, 1]]
        // with p_scale = 0.5: M = [[1, 0], [1, 1]]; M w = e1 -> w = [1, -1]
        let jac = one_cell_jacobian();
        let acc = vec![
            AdScalar::new(0.0, vec![2.0, 1.0]),
            AdScalar::new(0.0, vec![0.0, 1.0]),
        ];
        let ctx = ModelContext::with_accumulation(0.5, &acc);
        let mut w = vec![0.0; 2];
        compute_weights(
            &mut w,
            &jac,
            &WeightStrategy::TrueImpes,
            WeightScaling::None,
            &ctx,
            1,
        )
        .unwrap();
        assert!((w[0] - 1.0).abs() < 1e-14);
        assert!((w[1] + 1.0).abs() < 1e-14);
    }

    #[test]
    fn true_impes_without_accumulation_fails() {
        let jac = one_cell_jacobian();
        let mut w = vec![0.0; 2];
        let err = compute_weights(
            &mut w,
            &jac,
            &WeightStrategy::TrueImpes,
            WeightScaling::Unit,
            &ModelContext::empty(),
            1,
        )
        .unwrap_err();
        assert!(matches!(err, CprError::UnsupportedStrategy(_)));
    }

    #[test]
    fn strategy_parsing() {
        assert!(matches!(
            "quasi_impes".parse::<WeightStrategy>().unwrap(),
            WeightStrategy::QuasiImpes
        ));
        assert!(matches!(
            "bogus".parse::<WeightStrategy>(),
            Err(CprError::UnsupportedStrategy(_))
        ));
    }
}
