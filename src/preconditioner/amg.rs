//! Smoothed-aggregation algebraic multigrid for the scalar pressure system.
//!
//! The hierarchy is rebuilt from scratch by [`PressureSolver::setup`] and
//! numerically refreshed by [`PressureSolver::partial_refresh`], which keeps
//! the aggregation (the expensive structural decision) and reassembles the
//! transfer operators and Galerkin products from the new values. One
//! V-cycle with forward Gauss–Seidel pre-/post-smoothing and a dense LU on
//! the coarsest level is the default pressure solve.

use crate::core::traits::MatVec;
use crate::error::CprError;
use crate::matrix::sparse::ScalarCsr;
use crate::preconditioner::pressure::PressureMatrix;
use crate::preconditioner::PressureSolver;
use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};
use log::{debug, trace};

pub struct SmoothedAggregationAmg {
    /// Maximum number of levels including the coarsest.
    pub max_levels: usize,
    /// Stop coarsening at or below this many rows.
    pub max_coarse: usize,
    pub pre_sweeps: usize,
    pub post_sweeps: usize,
    /// Strength-of-connection cutoff for aggregation.
    pub strength_threshold: f64,
    /// Damping weight for the prolongation smoother.
    pub smoothing_weight: f64,
    levels: Vec<AmgLevel>,
    coarse: Option<CoarseSolver>,
}

struct AmgLevel {
    a: ScalarCsr,
    p: ScalarCsr,
    r: ScalarCsr,
    aggregates: Vec<usize>,
    n_coarse: usize,
}

struct CoarseSolver {
    n: usize,
    factor: FullPivLu<f64>,
}

impl CoarseSolver {
    fn factor(a: &ScalarCsr) -> Self {
        let n = a.nrows();
        let mut dense = Mat::<f64>::zeros(n, n);
        for i in 0..n {
            for (j, v) in a.row_entries(i) {
                dense[(i, j)] = v;
            }
        }
        Self { n, factor: FullPivLu::new(dense.as_ref()) }
    }

    fn solve(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
        let z_mat = MatMut::from_column_major_slice_mut(z, self.n, 1);
        self.factor.solve_in_place_with_conj(Conj::No, z_mat);
    }
}

impl SmoothedAggregationAmg {
    pub fn new() -> Self {
        Self {
            max_levels: 10,
            max_coarse: 10,
            pre_sweeps: 1,
            post_sweeps: 1,
            strength_threshold: 0.1,
            smoothing_weight: 2.0 / 3.0,
            levels: Vec::new(),
            coarse: None,
        }
    }

    pub fn levels(&self) -> usize {
        self.levels.len() + 1
    }

    fn build_hierarchy(&mut self, a0: ScalarCsr, reuse_aggregates: bool) -> Result<(), CprError> {
        let mut a = a0;
        if reuse_aggregates {
            let mut kept = std::mem::take(&mut self.levels);
            for level in kept.iter_mut() {
                let (p, r, a_c) =
                    self.transfer_operators(&a, &level.aggregates, level.n_coarse);
                level.a = a;
                level.p = p;
                level.r = r;
                a = a_c;
            }
            self.levels = kept;
        } else {
            self.levels.clear();
            while a.nrows() > self.max_coarse && self.levels.len() + 1 < self.max_levels {
                let diag = a.diagonal();
                let strength = strength_graph(&a, &diag, self.strength_threshold);
                let (aggregates, n_coarse) = pairwise_aggregation(&strength);
                if n_coarse >= a.nrows() {
                    // No progress; the matrix is effectively diagonal here.
                    break;
                }
                trace!(
                    "amg level {}: {} -> {} rows",
                    self.levels.len(),
                    a.nrows(),
                    n_coarse
                );
                let (p, r, a_c) = self.transfer_operators(&a, &aggregates, n_coarse);
                self.levels.push(AmgLevel { a, p, r, aggregates, n_coarse });
                a = a_c;
            }
            debug!(
                "amg hierarchy: {} levels, coarse size {}",
                self.levels.len() + 1,
                a.nrows()
            );
        }
        self.coarse = Some(CoarseSolver::factor(&a));
        Ok(())
    }

    /// Smoothed prolongation `P = (I − ω D⁻¹ A) P̂`, its transpose, and the
    /// Galerkin coarse operator `Pᵀ A P`.
    fn transfer_operators(
        &self,
        a: &ScalarCsr,
        aggregates: &[usize],
        n_coarse: usize,
    ) -> (ScalarCsr, ScalarCsr, ScalarCsr) {
        let n = a.nrows();
        let diag = a.diagonal();
        let omega = self.smoothing_weight;
        let mut row_ptr = vec![0usize; n + 1];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        let mut acc = vec![0.0; n_coarse];
        let mut marker = vec![usize::MAX; n_coarse];
        let mut touched = Vec::new();
        for i in 0..n {
            touched.clear();
            let mut add = |c: usize, v: f64, touched: &mut Vec<usize>| {
                if marker[c] != i {
                    marker[c] = i;
                    acc[c] = 0.0;
                    touched.push(c);
                }
                acc[c] += v;
            };
            add(aggregates[i], 1.0, &mut touched);
            let scale = if diag[i] != 0.0 { omega / diag[i] } else { 0.0 };
            for (j, v) in a.row_entries(i) {
                add(aggregates[j], -scale * v, &mut touched);
            }
            touched.sort_unstable();
            for &c in &touched {
                col_idx.push(c);
                values.push(acc[c]);
            }
            row_ptr[i + 1] = col_idx.len();
        }
        let p = ScalarCsr::new(n, n_coarse, row_ptr, col_idx, values);
        let r = p.transpose();
        let a_c = r.spmm(&a.spmm(&p));
        (p, r, a_c)
    }

    fn v_cycle(&self, level: usize, r: &[f64], z: &mut [f64]) {
        if level == self.levels.len() {
            self.coarse.as_ref().unwrap().solve(r, z);
            return;
        }
        let lvl = &self.levels[level];
        let n = lvl.a.nrows();
        gauss_seidel_forward(&lvl.a, r, z, self.pre_sweeps);
        let mut res = vec![0.0; n];
        lvl.a.matvec(z, &mut res);
        for i in 0..n {
            res[i] = r[i] - res[i];
        }
        let nc = lvl.n_coarse;
        let mut rc = vec![0.0; nc];
        lvl.r.matvec(&res, &mut rc);
        let mut zc = vec![0.0; nc];
        self.v_cycle(level + 1, &rc, &mut zc);
        lvl.p.matvec(&zc, &mut res);
        for i in 0..n {
            z[i] += res[i];
        }
        gauss_seidel_forward(&lvl.a, r, z, self.post_sweeps);
    }
}

impl Default for SmoothedAggregationAmg {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSolver for SmoothedAggregationAmg {
    fn setup(&mut self, a: &PressureMatrix) -> Result<(), CprError> {
        self.build_hierarchy(a.to_csr(), false)
    }

    fn partial_refresh(&mut self, a: &PressureMatrix) -> Result<(), CprError> {
        if self.levels.is_empty() && self.coarse.is_none() {
            return self.setup(a);
        }
        self.build_hierarchy(a.to_csr(), true)
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) -> Result<(), CprError> {
        if self.coarse.is_none() {
            return Err(CprError::SolveError(
                "amg apply before setup".to_string(),
            ));
        }
        z.fill(0.0);
        self.v_cycle(0, r, z);
        Ok(())
    }
}

/// One or more forward Gauss–Seidel sweeps on `A x = b`, updating `x` in
/// place.
fn gauss_seidel_forward(a: &ScalarCsr, b: &[f64], x: &mut [f64], sweeps: usize) {
    let n = a.nrows();
    for _ in 0..sweeps {
        for i in 0..n {
            let mut sigma = 0.0;
            let mut diag = 0.0;
            for (j, v) in a.row_entries(i) {
                if j == i {
                    diag = v;
                } else {
                    sigma += v * x[j];
                }
            }
            if diag != 0.0 {
                x[i] = (b[i] - sigma) / diag;
            }
        }
    }
}

/// Strength of connection: keep `j ≠ i` with
/// `|a_ij| / sqrt(|a_ii a_jj|) > threshold`.
fn strength_graph(a: &ScalarCsr, diag: &[f64], threshold: f64) -> ScalarCsr {
    let n = a.nrows();
    let mut row_ptr = vec![0usize; n + 1];
    let mut col_idx = Vec::new();
    let mut values = Vec::new();
    for i in 0..n {
        let a_ii = diag[i].abs();
        for (j, v) in a.row_entries(i) {
            if j == i {
                continue;
            }
            let a_jj = diag[j].abs();
            if a_ii > 0.0 && a_jj > 0.0 {
                let strength = v.abs() / (a_ii * a_jj).sqrt();
                if strength > threshold {
                    col_idx.push(j);
                    values.push(strength);
                }
            }
        }
        row_ptr[i + 1] = col_idx.len();
    }
    ScalarCsr::new(n, n, row_ptr, col_idx, values)
}

/// Pairwise aggregation over the strength graph: each unvisited node pairs
/// with its strongest unvisited neighbor, or forms a singleton.
fn pairwise_aggregation(s: &ScalarCsr) -> (Vec<usize>, usize) {
    let n = s.nrows();
    let mut aggregates = vec![usize::MAX; n];
    let mut next_id = 0;
    for i in 0..n {
        if aggregates[i] != usize::MAX {
            continue;
        }
        let mut max_strength = 0.0;
        let mut strongest = None;
        for (j, v) in s.row_entries(i) {
            if aggregates[j] == usize::MAX && v > max_strength {
                max_strength = v;
                strongest = Some(j);
            }
        }
        aggregates[i] = next_id;
        if let Some(j) = strongest {
            aggregates[j] = next_id;
        }
        next_id += 1;
    }
    (aggregates, next_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1-D Laplacian: tridiag(-1, 2, -1)
    fn laplacian(n: usize) -> ScalarCsr {
        let mut row_ptr = vec![0usize; n + 1];
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        for i in 0..n {
            if i > 0 {
                col_idx.push(i - 1);
                values.push(-1.0);
            }
            col_idx.push(i);
            values.push(2.0);
            if i + 1 < n {
                col_idx.push(i + 1);
                values.push(-1.0);
            }
            row_ptr[i + 1] = col_idx.len();
        }
        ScalarCsr::new(n, n, row_ptr, col_idx, values)
    }

    fn residual_norm(a: &ScalarCsr, b: &[f64], x: &[f64]) -> f64 {
        let n = a.nrows();
        let mut r = vec![0.0; n];
        a.matvec(x, &mut r);
        r.iter()
            .zip(b.iter())
            .map(|(ri, bi)| (bi - ri) * (bi - ri))
            .sum::<f64>()
            .sqrt()
    }

    #[test]
    fn one_cycle_reduces_residual() {
        let a = laplacian(40);
        let pm = PressureMatrix::Csr(a.clone());
        let mut amg = SmoothedAggregationAmg::new();
        amg.setup(&pm).unwrap();
        assert!(amg.levels() > 1);
        let b = vec![1.0; 40];
        let mut z = vec![0.0; 40];
        amg.apply(&b, &mut z).unwrap();
        let r0 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
        let r1 = residual_norm(&a, &b, &z);
        assert!(r1 < 0.5 * r0, "one V-cycle should contract: {r1} vs {r0}");
    }

    #[test]
    fn tiny_system_is_solved_exactly() {
        let a = laplacian(6);
        let pm = PressureMatrix::Csr(a.clone());
        let mut amg = SmoothedAggregationAmg::new();
        amg.setup(&pm).unwrap();
        // 6 <= max_coarse, so the hierarchy collapses to a direct solve
        assert_eq!(amg.levels(), 1);
        let b = vec![1.0, 0.0, 2.0, -1.0, 0.5, 3.0];
        let mut z = vec![0.0; 6];
        amg.apply(&b, &mut z).unwrap();
        assert!(residual_norm(&a, &b, &z) < 1e-10);
    }

    #[test]
    fn partial_refresh_tracks_new_values() {
        let a = laplacian(40);
        let pm = PressureMatrix::Csr(a.clone());
        let mut amg = SmoothedAggregationAmg::new();
        amg.setup(&pm).unwrap();

        // Same pattern, scaled values
        let scaled = ScalarCsr::new(
            40,
            40,
            a.row_ptr.clone(),
            a.col_idx.clone(),
            a.values.iter().map(|v| 3.0 * v).collect(),
        );
        let pm2 = PressureMatrix::Csr(scaled.clone());
        amg.partial_refresh(&pm2).unwrap();
        let b = vec![1.0; 40];
        let mut z = vec![0.0; 40];
        amg.apply(&b, &mut z).unwrap();
        let r0 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(residual_norm(&scaled, &b, &z) < 0.5 * r0);
    }

    #[test]
    fn apply_is_linear() {
        let a = laplacian(24);
        let pm = PressureMatrix::Csr(a);
        let mut amg = SmoothedAggregationAmg::new();
        amg.setup(&pm).unwrap();
        let r1: Vec<f64> = (0..24).map(|i| (i as f64).sin()).collect();
        let r2: Vec<f64> = (0..24).map(|i| 1.0 - 0.1 * i as f64).collect();
        let combined: Vec<f64> = r1
            .iter()
            .zip(r2.iter())
            .map(|(a, b)| 2.0 * a - 0.5 * b)
            .collect();
        let mut z1 = vec![0.0; 24];
        let mut z2 = vec![0.0; 24];
        let mut zc = vec![0.0; 24];
        amg.apply(&r1, &mut z1).unwrap();
        amg.apply(&r2, &mut z2).unwrap();
        amg.apply(&combined, &mut zc).unwrap();
        for i in 0..24 {
            let expect = 2.0 * z1[i] - 0.5 * z2[i];
            assert!((zc[i] - expect).abs() < 1e-9 * (1.0 + expect.abs()));
        }
    }
}
