//! Scalar sparse matrices (CSR, CSC).
//!
//! [`ScalarCsr`] carries the kernels the multigrid hierarchy is built from
//! (transpose, sparse product); [`ScalarCsc`] exists so a pressure system
//! extracted from a column-major Jacobian keeps the caller's orientation.

use crate::core::traits::{Indexing, MatVec};
use rayon::prelude::*;

/// Compressed sparse row matrix over `f64`.
#[derive(Clone)]
pub struct ScalarCsr {
    nrows: usize,
    ncols: usize,
    pub row_ptr: Vec<usize>,
    pub col_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl ScalarCsr {
    pub fn new(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        assert_eq!(row_ptr.len(), nrows + 1);
        assert_eq!(col_idx.len(), *row_ptr.last().unwrap());
        assert_eq!(values.len(), col_idx.len());
        Self { nrows, ncols, row_ptr, col_idx, values }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    /// Diagonal entries; structurally missing diagonals read as zero.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.nrows)
            .map(|i| {
                self.row_entries(i)
                    .find(|&(j, _)| j == i)
                    .map_or(0.0, |(_, v)| v)
            })
            .collect()
    }

    /// Iterator over `(col, value)` of row `i`.
    pub fn row_entries(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let lo = self.row_ptr[i];
        let hi = self.row_ptr[i + 1];
        self.col_idx[lo..hi]
            .iter()
            .copied()
            .zip(self.values[lo..hi].iter().copied())
    }

    /// Aᵀ, with sorted column indices.
    pub fn transpose(&self) -> ScalarCsr {
        let mut row_ptr = vec![0usize; self.ncols + 1];
        for &j in &self.col_idx {
            row_ptr[j + 1] += 1;
        }
        for i in 0..self.ncols {
            row_ptr[i + 1] += row_ptr[i];
        }
        let mut next = row_ptr.clone();
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        for i in 0..self.nrows {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                let j = self.col_idx[k];
                let dst = next[j];
                next[j] += 1;
                col_idx[dst] = i;
                values[dst] = self.values[k];
            }
        }
        ScalarCsr::new(self.ncols, self.nrows, row_ptr, col_idx, values)
    }

    /// Sparse product `self · other` via row-merge with a dense
    /// accumulator. Setup-path only; not tuned for repeated use.
    pub fn spmm(&self, other: &ScalarCsr) -> ScalarCsr {
        assert_eq!(self.ncols, other.nrows);
        let n = self.nrows;
        let m = other.ncols;
        let mut row_ptr = vec![0usize; n + 1];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        let mut acc = vec![0.0; m];
        let mut marker = vec![usize::MAX; m];
        let mut touched = Vec::new();
        for i in 0..n {
            touched.clear();
            for (j, v) in self.row_entries(i) {
                for (l, w) in other.row_entries(j) {
                    if marker[l] != i {
                        marker[l] = i;
                        acc[l] = 0.0;
                        touched.push(l);
                    }
                    acc[l] += v * w;
                }
            }
            touched.sort_unstable();
            for &l in &touched {
                col_idx.push(l);
                values.push(acc[l]);
            }
            row_ptr[i + 1] = col_idx.len();
        }
        ScalarCsr::new(n, m, row_ptr, col_idx, values)
    }

    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        y.par_iter_mut().enumerate().for_each(|(i, yi)| {
            let mut sum = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            *yi = sum;
        });
    }
}

impl MatVec<[f64]> for ScalarCsr {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.spmv(x, y)
    }
}

impl Indexing for ScalarCsr {
    fn nrows(&self) -> usize {
        self.nrows
    }
}

/// Compressed sparse column matrix over `f64`.
#[derive(Clone)]
pub struct ScalarCsc {
    nrows: usize,
    ncols: usize,
    pub col_ptr: Vec<usize>,
    pub row_idx: Vec<usize>,
    pub values: Vec<f64>,
}

impl ScalarCsc {
    pub fn new(
        nrows: usize,
        ncols: usize,
        col_ptr: Vec<usize>,
        row_idx: Vec<usize>,
        values: Vec<f64>,
    ) -> Self {
        assert_eq!(col_ptr.len(), ncols + 1);
        assert_eq!(row_idx.len(), *col_ptr.last().unwrap());
        assert_eq!(values.len(), row_idx.len());
        Self { nrows, ncols, col_ptr, row_idx, values }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }
    pub fn ncols(&self) -> usize {
        self.ncols
    }
    pub fn nnz(&self) -> usize {
        self.row_idx.len()
    }

    /// The same matrix in CSR order, with sorted column indices.
    pub fn to_csr(&self) -> ScalarCsr {
        let mut row_ptr = vec![0usize; self.nrows + 1];
        for &r in &self.row_idx {
            row_ptr[r + 1] += 1;
        }
        for i in 0..self.nrows {
            row_ptr[i + 1] += row_ptr[i];
        }
        let mut next = row_ptr.clone();
        let mut col_idx = vec![0usize; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        for j in 0..self.ncols {
            for k in self.col_ptr[j]..self.col_ptr[j + 1] {
                let r = self.row_idx[k];
                let dst = next[r];
                next[r] += 1;
                col_idx[dst] = j;
                values[dst] = self.values[k];
            }
        }
        ScalarCsr::new(self.nrows, self.ncols, row_ptr, col_idx, values)
    }

    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        y.fill(0.0);
        for j in 0..self.ncols {
            let xj = x[j];
            for k in self.col_ptr[j]..self.col_ptr[j + 1] {
                y[self.row_idx[k]] += self.values[k] * xj;
            }
        }
    }
}

impl MatVec<[f64]> for ScalarCsc {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        self.spmv(x, y)
    }
}

impl Indexing for ScalarCsc {
    fn nrows(&self) -> usize {
        self.nrows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_spmv() {
        // 3×3 identity in CSR: row_ptr=[0,1,2,3], col_idx=[0,1,2], vals=[1,1,1]
        let m = ScalarCsr::new(3, 3, vec![0, 1, 2, 3], vec![0, 1, 2], vec![1.0, 1.0, 1.0]);
        let x = [2.0, 3.0, 5.0];
        let mut y = [0.0; 3];
        m.matvec(&x, &mut y);
        assert_eq!(y, x);
    }

    #[test]
    fn simple_pattern() {
        // 2×3 matrix [[1,2,0],[0,3,4]]
        let m = ScalarCsr::new(2, 3, vec![0, 2, 4], vec![0, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let x = [1.0, 1.0, 1.0];
        let mut y = [0.0; 2];
        m.matvec(&x, &mut y);
        assert_eq!(y, [3.0, 7.0]);
    }

    #[test]
    fn transpose_round_trip() {
        let m = ScalarCsr::new(2, 3, vec![0, 2, 4], vec![0, 1, 1, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let tt = m.transpose().transpose();
        assert_eq!(tt.row_ptr, m.row_ptr);
        assert_eq!(tt.col_idx, m.col_idx);
        assert_eq!(tt.values, m.values);
    }

    #[test]
    fn spmm_small() {
        // [[1,2],[0,3]] * [[4,0],[1,5]] = [[6,10],[3,15]]
        let a = ScalarCsr::new(2, 2, vec![0, 2, 3], vec![0, 1, 1], vec![1.0, 2.0, 3.0]);
        let b = ScalarCsr::new(2, 2, vec![0, 2, 4], vec![0, 1, 0, 1], vec![4.0, 0.0, 1.0, 5.0]);
        let c = a.spmm(&b);
        let x = [1.0, 1.0];
        let mut y = [0.0; 2];
        c.matvec(&x, &mut y);
        assert_eq!(y, [16.0, 18.0]);
    }

    #[test]
    fn csc_matches_csr() {
        // [[1,0,2],[0,3,0],[4,0,5]]
        let csr = ScalarCsr::new(
            3,
            3,
            vec![0, 2, 3, 5],
            vec![0, 2, 1, 0, 2],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
        );
        let csc = ScalarCsc::new(
            3,
            3,
            vec![0, 2, 3, 5],
            vec![0, 2, 1, 0, 2],
            vec![1.0, 4.0, 3.0, 2.0, 5.0],
        );
        let x = [1.0, -2.0, 0.5];
        let mut y1 = [0.0; 3];
        let mut y2 = [0.0; 3];
        csr.matvec(&x, &mut y1);
        csc.matvec(&x, &mut y2);
        for (a, b) in y1.iter().zip(y2.iter()) {
            assert!((a - b).abs() < 1e-14);
        }
        let conv = csc.to_csr();
        assert_eq!(conv.row_ptr, csr.row_ptr);
        assert_eq!(conv.col_idx, csr.col_idx);
        assert_eq!(conv.values, csr.values);
    }
}
