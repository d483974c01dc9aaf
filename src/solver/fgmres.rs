//! Flexible GMRES (FGMRES) solver (Saad §9.4)
//!
//! Right-preconditioned GMRES that tolerates a preconditioner whose action
//! changes between iterations, which is what a multigrid cycle wrapped in
//! an outer Krylov loop looks like. The Arnoldi basis, Hessenberg entries,
//! and rotation buffers live in a workspace that is built on first use and
//! reused on every later solve, so repeated inner solves stay
//! allocation-free.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd
//!   Edition. SIAM. §9.4

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::CprError;
use crate::preconditioner::FlexiblePreconditioner;
use crate::utils::convergence::{Convergence, SolveStats};
use num_traits::Float;

struct Workspace<T> {
    v: Vec<Vec<T>>,
    z: Vec<Vec<T>>,
    h: Vec<Vec<T>>,
    cs: Vec<T>,
    sn: Vec<T>,
    s: Vec<T>,
    w: Vec<T>,
    r: Vec<T>,
}

impl<T: Float> Workspace<T> {
    fn new(n: usize, restart: usize) -> Self {
        Self {
            v: vec![vec![T::zero(); n]; restart + 1],
            z: vec![vec![T::zero(); n]; restart],
            h: vec![vec![T::zero(); restart]; restart + 1],
            cs: vec![T::zero(); restart],
            sn: vec![T::zero(); restart],
            s: vec![T::zero(); restart + 1],
            w: vec![T::zero(); n],
            r: vec![T::zero(); n],
        }
    }
}

/// Flexible GMRES solver.
pub struct FgmresSolver<T> {
    /// Convergence criteria (relative/absolute tolerance, max iterations)
    pub conv: Convergence<T>,
    /// Restart parameter (number of Arnoldi vectors per cycle)
    pub restart: usize,
    /// Happy breakdown tolerance
    pub haptol: T,
    /// History of residual norms for each iteration
    pub residual_history: Vec<T>,
    ws: Option<Workspace<T>>,
}

impl<T: Float + From<f64>> FgmresSolver<T> {
    pub fn new(rtol: T, atol: T, max_iters: usize, restart: usize) -> Self {
        Self {
            conv: Convergence { rtol, atol, max_iters },
            restart,
            haptol: <T as From<f64>>::from(1e-12),
            residual_history: Vec::new(),
            ws: None,
        }
    }

    /// Clear the residual history.
    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }

    /// Right-preconditioned flexible GMRES on `A x = b`.
    ///
    /// `x` is the initial guess on entry and the best-effort solution on
    /// exit; non-convergence within the iteration limit is reported in
    /// the stats, not as an error.
    pub fn solve(
        &mut self,
        a: &dyn MatVec<[T]>,
        mut pc: Option<&mut dyn FlexiblePreconditioner<[T]>>,
        b: &[T],
        x: &mut [T],
    ) -> Result<SolveStats<T>, CprError> {
        let n = b.len();
        assert_eq!(x.len(), n);
        let ip = ();
        let restart = self.restart;
        if self
            .ws
            .as_ref()
            .map_or(true, |ws| ws.w.len() != n || ws.z.len() != restart)
        {
            self.ws = Some(Workspace::new(n, restart));
        }
        let ws = self.ws.as_mut().unwrap();

        // Initial residual r = b - A x
        a.matvec(x, &mut ws.w);
        for (ri, (bi, wi)) in ws.r.iter_mut().zip(b.iter().zip(ws.w.iter())) {
            *ri = *bi - *wi;
        }
        let res0 = ip.norm(&ws.r[..]);
        if res0 == T::zero() {
            return Ok(SolveStats { iterations: 0, final_residual: T::zero(), converged: true });
        }

        let mut total_iters = 0;
        let mut res_norm = res0;
        let mut stats = SolveStats { iterations: 0, final_residual: res0, converged: false };
        'outer: while total_iters < self.conv.max_iters {
            let beta = ip.norm(&ws.r[..]);
            let (stop, s_stats) = self.conv.check(beta, res0, total_iters);
            if stop {
                stats = s_stats;
                break;
            }
            for (vi, ri) in ws.v[0].iter_mut().zip(ws.r.iter()) {
                *vi = *ri / beta;
            }
            for si in ws.s.iter_mut() {
                *si = T::zero();
            }
            ws.s[0] = beta;

            let mut k = 0;
            for j in 0..restart {
                if total_iters >= self.conv.max_iters {
                    break;
                }
                // (a) Precondition: z[j] = M⁻¹ v[j]
                if let Some(ref mut pc) = pc {
                    let (vj, zj) = (&ws.v[j], &mut ws.z[j]);
                    pc.apply(vj, zj)?;
                } else {
                    ws.z[j].copy_from_slice(&ws.v[j]);
                }
                // (b) w = A z[j]
                a.matvec(&ws.z[j], &mut ws.w);
                // (c) Classical Gram-Schmidt orthonormalization
                for i in 0..=j {
                    let hij = ip.dot(&ws.w[..], &ws.v[i][..]);
                    ws.h[i][j] = hij;
                    for (wi, vi) in ws.w.iter_mut().zip(ws.v[i].iter()) {
                        *wi = *wi - hij * *vi;
                    }
                }
                let hnext = ip.norm(&ws.w[..]);
                ws.h[j + 1][j] = hnext;
                // Happy breakdown detection
                let hapbnd = self.haptol * ws.s[j].abs();
                if hnext > hapbnd && hnext > T::zero() {
                    for (vi, wi) in ws.v[j + 1].iter_mut().zip(ws.w.iter()) {
                        *vi = *wi / hnext;
                    }
                } else {
                    for vi in ws.v[j + 1].iter_mut() {
                        *vi = T::zero();
                    }
                }
                // (d) Apply previous Givens rotations to column j
                for i in 0..j {
                    let temp = ws.cs[i] * ws.h[i][j] + ws.sn[i] * ws.h[i + 1][j];
                    ws.h[i + 1][j] = -ws.sn[i] * ws.h[i][j] + ws.cs[i] * ws.h[i + 1][j];
                    ws.h[i][j] = temp;
                }
                // (e) New Givens rotation annihilating h[j+1][j]
                let (c, s_) = {
                    let h1 = ws.h[j][j];
                    let h2 = ws.h[j + 1][j];
                    let denom = (h1 * h1 + h2 * h2).sqrt();
                    if denom == T::zero() {
                        (T::one(), T::zero())
                    } else {
                        (h1 / denom, h2 / denom)
                    }
                };
                ws.cs[j] = c;
                ws.sn[j] = s_;
                let temp = c * ws.s[j] + s_ * ws.s[j + 1];
                ws.s[j + 1] = -s_ * ws.s[j] + c * ws.s[j + 1];
                ws.s[j] = temp;
                ws.h[j][j] = c * ws.h[j][j] + s_ * ws.h[j + 1][j];
                ws.h[j + 1][j] = T::zero();

                res_norm = ws.s[j + 1].abs();
                total_iters += 1;
                k = j + 1;
                self.residual_history.push(res_norm);
                let (stop, s_stats) = self.conv.check(res_norm, res0, total_iters);
                stats = s_stats;
                if stop {
                    break;
                }
            }
            // Back-substitute the k×k upper-triangular system and update x
            let mut y = vec![T::zero(); k];
            for i in (0..k).rev() {
                let mut sum = ws.s[i];
                for l in (i + 1)..k {
                    sum = sum - ws.h[i][l] * y[l];
                }
                y[i] = sum / ws.h[i][i];
            }
            for (i, yi) in y.iter().enumerate() {
                for (xi, zi) in x.iter_mut().zip(ws.z[i].iter()) {
                    *xi = *xi + *yi * *zi;
                }
            }
            // True residual for the restart / final check
            a.matvec(x, &mut ws.w);
            for ((ri, bi), wi) in ws.r.iter_mut().zip(b.iter()).zip(ws.w.iter()) {
                *ri = *bi - *wi;
            }
            res_norm = ip.norm(&ws.r[..]);
            let (stop, s_stats) = self.conv.check(res_norm, res0, total_iters);
            stats = s_stats;
            if stop {
                break 'outer;
            }
        }
        stats.final_residual = res_norm;
        stats.iterations = total_iters;
        Ok(stats)
    }
}
