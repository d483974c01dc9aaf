//! Small dense kernels for cell-sized (`b × b`) blocks.
//!
//! Blocks are stored column-major, matching the per-nonzero layout of
//! [`crate::matrix::block`]. Everything here works in place on caller
//! scratch so the parallel loops above it stay allocation-free.

/// Solve `A x = rhs` in place by Gaussian elimination with partial
/// pivoting. `a` is row-major `n × n` and is destroyed; on success `rhs`
/// holds the solution. Returns `false` when a pivot vanishes.
pub fn solve_in_place(a: &mut [f64], rhs: &mut [f64], n: usize) -> bool {
    debug_assert!(a.len() >= n * n && rhs.len() >= n);
    for k in 0..n {
        // Pivot search in column k
        let mut piv = k;
        let mut piv_val = a[k * n + k].abs();
        for i in (k + 1)..n {
            let v = a[i * n + k].abs();
            if v > piv_val {
                piv = i;
                piv_val = v;
            }
        }
        if piv_val == 0.0 {
            return false;
        }
        if piv != k {
            for j in 0..n {
                a.swap(k * n + j, piv * n + j);
            }
            rhs.swap(k, piv);
        }
        let inv = 1.0 / a[k * n + k];
        for i in (k + 1)..n {
            let factor = a[i * n + k] * inv;
            if factor == 0.0 {
                continue;
            }
            for j in (k + 1)..n {
                a[i * n + j] -= factor * a[k * n + j];
            }
            rhs[i] -= factor * rhs[k];
        }
    }
    // Back substitution
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..n {
            sum -= a[i * n + j] * rhs[j];
        }
        rhs[i] = sum / a[i * n + i];
    }
    true
}

/// Invert a column-major `n × n` block in place via Gauss–Jordan with
/// partial pivoting. `pivots` must hold at least `n` entries for the
/// swap records. Returns `false` when the block is singular.
pub fn invert_in_place(a: &mut [f64], n: usize, pivots: &mut [usize]) -> bool {
    debug_assert!(a.len() >= n * n && pivots.len() >= n);
    let idx = |i: usize, j: usize| j * n + i;
    for k in 0..n {
        let mut piv = k;
        let mut piv_val = a[idx(k, k)].abs();
        for i in (k + 1)..n {
            let v = a[idx(i, k)].abs();
            if v > piv_val {
                piv = i;
                piv_val = v;
            }
        }
        if piv_val == 0.0 {
            return false;
        }
        pivots[k] = piv;
        if piv != k {
            for j in 0..n {
                a.swap(idx(k, j), idx(piv, j));
            }
        }
        let pivot_inv = 1.0 / a[idx(k, k)];
        a[idx(k, k)] = pivot_inv;
        for j in 0..n {
            if j != k {
                a[idx(k, j)] *= pivot_inv;
            }
        }
        for i in 0..n {
            if i == k {
                continue;
            }
            let factor = a[idx(i, k)];
            if factor == 0.0 {
                continue;
            }
            a[idx(i, k)] = -factor * pivot_inv;
            for j in 0..n {
                if j != k {
                    a[idx(i, j)] -= factor * a[idx(k, j)];
                }
            }
        }
    }
    // Row swaps during elimination leave the columns of the inverse
    // scrambled; unswap them in reverse pivot order.
    for k in (0..n).rev() {
        let pk = pivots[k];
        if pk != k {
            for i in 0..n {
                a.swap(idx(i, k), idx(i, pk));
            }
        }
    }
    true
}

/// c ← a · b for column-major `n × n` blocks.
pub fn block_mul(c: &mut [f64], a: &[f64], b: &[f64], n: usize) {
    for j in 0..n {
        for i in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += a[k * n + i] * b[j * n + k];
            }
            c[j * n + i] = sum;
        }
    }
}

/// c ← c − a · b for column-major `n × n` blocks.
pub fn block_mul_sub(c: &mut [f64], a: &[f64], b: &[f64], n: usize) {
    for j in 0..n {
        for i in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += a[k * n + i] * b[j * n + k];
            }
            c[j * n + i] -= sum;
        }
    }
}

/// y ← a · x for a column-major `n × n` block.
pub fn block_vec_mul(y: &mut [f64], a: &[f64], x: &[f64], n: usize) {
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..n {
            sum += a[j * n + i] * x[j];
        }
        y[i] = sum;
    }
}

/// y ← y − a · x for a column-major `n × n` block.
pub fn block_vec_mul_sub(y: &mut [f64], a: &[f64], x: &[f64], n: usize) {
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..n {
            sum += a[j * n + i] * x[j];
        }
        y[i] -= sum;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_2x2() {
        // [[2,1],[1,3]] x = [1,0]  =>  x = [0.6, -0.2]
        let mut a = [2.0, 1.0, 1.0, 3.0];
        let mut rhs = [1.0, 0.0];
        assert!(solve_in_place(&mut a, &mut rhs, 2));
        assert!((rhs[0] - 0.6).abs() < 1e-14);
        assert!((rhs[1] + 0.2).abs() < 1e-14);
    }

    #[test]
    fn solve_needs_pivoting() {
        // Zero leading entry forces a row swap
        let mut a = [0.0, 1.0, 1.0, 1.0];
        let mut rhs = [2.0, 3.0];
        assert!(solve_in_place(&mut a, &mut rhs, 2));
        // A = [[0,1],[1,1]]: x1 = 2, then x0 + x1 = 3 -> x0 = 1
        assert!((rhs[0] - 1.0).abs() < 1e-14);
        assert!((rhs[1] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn solve_singular() {
        let mut a = [1.0, 2.0, 2.0, 4.0];
        let mut rhs = [1.0, 2.0];
        assert!(!solve_in_place(&mut a, &mut rhs, 2));
    }

    #[test]
    fn invert_3x3_round_trip() {
        // Column-major [[4,1,0],[2,5,1],[0,1,3]]
        let a = [4.0, 2.0, 0.0, 1.0, 5.0, 1.0, 0.0, 1.0, 3.0];
        let mut inv = a;
        let mut perm = [0usize; 3];
        assert!(invert_in_place(&mut inv, 3, &mut perm));
        let mut prod = [0.0; 9];
        block_mul(&mut prod, &a, &inv, 3);
        for i in 0..3 {
            for j in 0..3 {
                let expect = if i == j { 1.0 } else { 0.0 };
                assert!((prod[j * 3 + i] - expect).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn block_vec_products() {
        // Column-major [[1,2],[3,4]]
        let a = [1.0, 3.0, 2.0, 4.0];
        let x = [1.0, 1.0];
        let mut y = [0.0; 2];
        block_vec_mul(&mut y, &a, &x, 2);
        assert_eq!(y, [3.0, 7.0]);
        block_vec_mul_sub(&mut y, &a, &x, 2);
        assert_eq!(y, [0.0, 0.0]);
    }
}
