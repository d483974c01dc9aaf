//! Pressure-system extraction: the scalar matrix sharing the Jacobian's
//! sparsity, and the weighted projection that fills its values.
//!
//! The shell is allocated once, on the first update; every later update
//! rewrites values in place. The pattern arrays never change after
//! allocation, and the builder relies on the shell and the Jacobian
//! iterating structural nonzeros in identical order.

use crate::core::traits::{Indexing, MatVec};
use crate::error::CprError;
use crate::matrix::block::BlockMatrix;
use crate::matrix::sparse::{ScalarCsc, ScalarCsr};
use rayon::prelude::*;

/// Scalar pressure matrix mirroring the block Jacobian's pattern and
/// orientation.
pub enum PressureMatrix {
    Csr(ScalarCsr),
    Csc(ScalarCsc),
}

impl PressureMatrix {
    /// The shell: same pattern as `jac`, values zeroed.
    pub fn with_pattern_of(jac: &BlockMatrix) -> Self {
        let n = jac.n_cells();
        match jac {
            BlockMatrix::Csr(m) => PressureMatrix::Csr(ScalarCsr::new(
                n,
                n,
                m.row_ptr().to_vec(),
                m.col_idx().to_vec(),
                vec![0.0; m.nnz()],
            )),
            BlockMatrix::Csc(m) => PressureMatrix::Csc(ScalarCsc::new(
                n,
                n,
                m.col_ptr().to_vec(),
                m.row_idx().to_vec(),
                vec![0.0; m.nnz()],
            )),
        }
    }

    pub fn nnz(&self) -> usize {
        match self {
            PressureMatrix::Csr(m) => m.nnz(),
            PressureMatrix::Csc(m) => m.nnz(),
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            PressureMatrix::Csr(m) => m.nrows(),
            PressureMatrix::Csc(m) => m.nrows(),
        }
    }

    /// A CSR view for consumers that need row access, copying only when
    /// the shell is column-major.
    pub fn to_csr(&self) -> ScalarCsr {
        match self {
            PressureMatrix::Csr(m) => m.clone(),
            PressureMatrix::Csc(m) => m.to_csr(),
        }
    }

    /// Rewrite every structural nonzero as the weighted projection of the
    /// corresponding block's pressure column:
    ///
    /// `values[k] = Σ_i block[k][i, 0] · w[i, row(k)]`
    ///
    /// `w` is `b × n` column-major. Writes are disjoint per nonzero, so the
    /// loop parallelizes without ordering concerns.
    pub fn rebuild_values(
        &mut self,
        jac: &BlockMatrix,
        w: &[f64],
        min_batch: usize,
    ) -> Result<(), CprError> {
        let b = jac.block_size();
        match (self, jac) {
            (PressureMatrix::Csr(ap), BlockMatrix::Csr(j)) => {
                if ap.nnz() != j.nnz() {
                    return Err(CprError::DimensionMismatch {
                        expected: ap.nnz(),
                        found: j.nnz(),
                    });
                }
                let row_ptr = j.row_ptr();
                let blocks = j.blocks();
                let bb = b * b;
                ap.values
                    .par_iter_mut()
                    .enumerate()
                    .with_min_len(min_batch)
                    .for_each(|(k, v)| {
                        // Row owning nonzero k, recovered from the row
                        // pointers (row_ptr[row] <= k < row_ptr[row+1]).
                        let row = row_ptr.partition_point(|&p| p <= k) - 1;
                        let blk = &blocks[k * bb..k * bb + b];
                        let wc = &w[row * b..(row + 1) * b];
                        let mut sum = 0.0;
                        for i in 0..b {
                            sum += blk[i] * wc[i];
                        }
                        *v = sum;
                    });
                Ok(())
            }
            (PressureMatrix::Csc(ap), BlockMatrix::Csc(j)) => {
                if ap.nnz() != j.nnz() {
                    return Err(CprError::DimensionMismatch {
                        expected: ap.nnz(),
                        found: j.nnz(),
                    });
                }
                let row_idx = &ap.row_idx;
                ap.values
                    .par_iter_mut()
                    .enumerate()
                    .with_min_len(min_batch)
                    .for_each(|(k, v)| {
                        let row = row_idx[k];
                        let blk = &j.block(k)[..b];
                        let wc = &w[row * b..(row + 1) * b];
                        let mut sum = 0.0;
                        for i in 0..b {
                            sum += blk[i] * wc[i];
                        }
                        *v = sum;
                    });
                Ok(())
            }
            (ap, j) => Err(CprError::DimensionMismatch {
                expected: ap.nnz(),
                found: j.nnz(),
            }),
        }
    }
}

impl MatVec<[f64]> for PressureMatrix {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        match self {
            PressureMatrix::Csr(m) => m.matvec(x, y),
            PressureMatrix::Csc(m) => m.matvec(x, y),
        }
    }
}

impl Indexing for PressureMatrix {
    fn nrows(&self) -> usize {
        PressureMatrix::nrows(self)
    }
}
