//! Block-sparse Jacobian storage.
//!
//! One `b × b` dense block per structural nonzero, one block row/column per
//! cell. Blocks are stored column-major within the flat `blocks` array, so
//! block `k` occupies `blocks[k*b*b .. (k+1)*b*b]` with entry `(i, j)` at
//! offset `j*b + i`. The outer pattern is either CSR or CSC; both are
//! wrapped in [`BlockMatrix`] so the rest of the crate is agnostic to the
//! caller's orientation.

use crate::core::traits::{Indexing, MatVec};
use rayon::prelude::*;

/// Row-major (CSR) block matrix: `row_ptr` spans cells, `col_idx` holds the
/// block column of each structural nonzero.
#[derive(Clone)]
pub struct BlockCsrMatrix {
    n_cells: usize,
    block_size: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    blocks: Vec<f64>,
}

impl BlockCsrMatrix {
    /// Build from raw CSR arrays. Column indices must be sorted within each
    /// row; the block-ILU factorization and diagonal lookups rely on it.
    pub fn from_csr(
        n_cells: usize,
        block_size: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        blocks: Vec<f64>,
    ) -> Self {
        assert_eq!(row_ptr.len(), n_cells + 1);
        let nnz = *row_ptr.last().unwrap();
        assert_eq!(col_idx.len(), nnz);
        assert_eq!(blocks.len(), nnz * block_size * block_size);
        for c in 0..n_cells {
            assert!(
                row_ptr[c] <= row_ptr[c + 1] && row_ptr[c + 1] <= nnz,
                "row_ptr not monotone"
            );
            assert!(
                col_idx[row_ptr[c]..row_ptr[c + 1]].windows(2).all(|w| w[0] < w[1]),
                "column indices not sorted in row {c}"
            );
        }
        Self { n_cells, block_size, row_ptr, col_idx, blocks }
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }
    pub fn block_size(&self) -> usize {
        self.block_size
    }
    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }
    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }
    pub fn col_idx(&self) -> &[usize] {
        &self.col_idx
    }
    /// Block `k` as a column-major `b × b` slice.
    pub fn block(&self, k: usize) -> &[f64] {
        let bb = self.block_size * self.block_size;
        &self.blocks[k * bb..(k + 1) * bb]
    }
    pub fn blocks(&self) -> &[f64] {
        &self.blocks
    }

    /// Structural position of the diagonal block of `cell`.
    pub fn diagonal_index(&self, cell: usize) -> Option<usize> {
        let lo = self.row_ptr[cell];
        let hi = self.row_ptr[cell + 1];
        self.col_idx[lo..hi]
            .binary_search(&cell)
            .ok()
            .map(|p| lo + p)
    }

    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        let b = self.block_size;
        assert_eq!(x.len(), self.n_cells * b);
        assert_eq!(y.len(), self.n_cells * b);
        y.par_chunks_mut(b).enumerate().for_each(|(row, yc)| {
            yc.fill(0.0);
            for k in self.row_ptr[row]..self.row_ptr[row + 1] {
                let col = self.col_idx[k];
                let blk = self.block(k);
                let xc = &x[col * b..(col + 1) * b];
                for j in 0..b {
                    let xj = xc[j];
                    for i in 0..b {
                        yc[i] += blk[j * b + i] * xj;
                    }
                }
            }
        });
    }
}

/// Column-major (CSC) block matrix: `col_ptr` spans cells, `row_idx` holds
/// the block row of each structural nonzero.
#[derive(Clone)]
pub struct BlockCscMatrix {
    n_cells: usize,
    block_size: usize,
    col_ptr: Vec<usize>,
    row_idx: Vec<usize>,
    blocks: Vec<f64>,
}

impl BlockCscMatrix {
    /// Build from raw CSC arrays. Row indices must be sorted within each
    /// column.
    pub fn from_csc(
        n_cells: usize,
        block_size: usize,
        col_ptr: Vec<usize>,
        row_idx: Vec<usize>,
        blocks: Vec<f64>,
    ) -> Self {
        assert_eq!(col_ptr.len(), n_cells + 1);
        let nnz = *col_ptr.last().unwrap();
        assert_eq!(row_idx.len(), nnz);
        assert_eq!(blocks.len(), nnz * block_size * block_size);
        for c in 0..n_cells {
            assert!(
                col_ptr[c] <= col_ptr[c + 1] && col_ptr[c + 1] <= nnz,
                "col_ptr not monotone"
            );
            assert!(
                row_idx[col_ptr[c]..col_ptr[c + 1]].windows(2).all(|w| w[0] < w[1]),
                "row indices not sorted in column {c}"
            );
        }
        Self { n_cells, block_size, col_ptr, row_idx, blocks }
    }

    pub fn n_cells(&self) -> usize {
        self.n_cells
    }
    pub fn block_size(&self) -> usize {
        self.block_size
    }
    pub fn nnz(&self) -> usize {
        self.row_idx.len()
    }
    pub fn col_ptr(&self) -> &[usize] {
        &self.col_ptr
    }
    pub fn row_idx(&self) -> &[usize] {
        &self.row_idx
    }
    /// Block `k` as a column-major `b × b` slice.
    pub fn block(&self, k: usize) -> &[f64] {
        let bb = self.block_size * self.block_size;
        &self.blocks[k * bb..(k + 1) * bb]
    }

    /// Structural position of the diagonal block of `cell`.
    pub fn diagonal_index(&self, cell: usize) -> Option<usize> {
        let lo = self.col_ptr[cell];
        let hi = self.col_ptr[cell + 1];
        self.row_idx[lo..hi]
            .binary_search(&cell)
            .ok()
            .map(|p| lo + p)
    }

    fn spmv(&self, x: &[f64], y: &mut [f64]) {
        let b = self.block_size;
        assert_eq!(x.len(), self.n_cells * b);
        assert_eq!(y.len(), self.n_cells * b);
        y.fill(0.0);
        // Scatter form: columns write to overlapping rows, so this stays
        // sequential.
        for col in 0..self.n_cells {
            let xc = &x[col * b..(col + 1) * b];
            for k in self.col_ptr[col]..self.col_ptr[col + 1] {
                let row = self.row_idx[k];
                let blk = self.block(k);
                let yc = &mut y[row * b..(row + 1) * b];
                for j in 0..b {
                    let xj = xc[j];
                    for i in 0..b {
                        yc[i] += blk[j * b + i] * xj;
                    }
                }
            }
        }
    }

    /// Re-lay the same matrix out in block-CSR order.
    pub fn to_block_csr(&self) -> BlockCsrMatrix {
        let n = self.n_cells;
        let b = self.block_size;
        let bb = b * b;
        let nnz = self.nnz();
        let mut row_ptr = vec![0usize; n + 1];
        for &r in &self.row_idx {
            row_ptr[r + 1] += 1;
        }
        for i in 0..n {
            row_ptr[i + 1] += row_ptr[i];
        }
        let mut next = row_ptr.clone();
        let mut col_idx = vec![0usize; nnz];
        let mut blocks = vec![0.0; nnz * bb];
        for col in 0..n {
            for k in self.col_ptr[col]..self.col_ptr[col + 1] {
                let row = self.row_idx[k];
                let dst = next[row];
                next[row] += 1;
                col_idx[dst] = col;
                blocks[dst * bb..(dst + 1) * bb]
                    .copy_from_slice(&self.blocks[k * bb..(k + 1) * bb]);
            }
        }
        BlockCsrMatrix::from_csr(n, b, row_ptr, col_idx, blocks)
    }
}

/// A block Jacobian in either orientation.
pub enum BlockMatrix {
    Csr(BlockCsrMatrix),
    Csc(BlockCscMatrix),
}

impl BlockMatrix {
    pub fn n_cells(&self) -> usize {
        match self {
            BlockMatrix::Csr(m) => m.n_cells(),
            BlockMatrix::Csc(m) => m.n_cells(),
        }
    }
    pub fn block_size(&self) -> usize {
        match self {
            BlockMatrix::Csr(m) => m.block_size(),
            BlockMatrix::Csc(m) => m.block_size(),
        }
    }
    pub fn nnz(&self) -> usize {
        match self {
            BlockMatrix::Csr(m) => m.nnz(),
            BlockMatrix::Csc(m) => m.nnz(),
        }
    }

    /// Copy the diagonal block of `cell` (column-major) into `out`.
    /// Returns `false` when the cell has no structural diagonal.
    pub fn diagonal_block_into(&self, cell: usize, out: &mut [f64]) -> bool {
        let (blk, bb) = match self {
            BlockMatrix::Csr(m) => match m.diagonal_index(cell) {
                Some(k) => (m.block(k), m.block_size() * m.block_size()),
                None => return false,
            },
            BlockMatrix::Csc(m) => match m.diagonal_index(cell) {
                Some(k) => (m.block(k), m.block_size() * m.block_size()),
                None => return false,
            },
        };
        out[..bb].copy_from_slice(blk);
        true
    }

    /// The matrix in block-CSR order, copying only when the source is CSC.
    pub fn to_block_csr(&self) -> std::borrow::Cow<'_, BlockCsrMatrix> {
        match self {
            BlockMatrix::Csr(m) => std::borrow::Cow::Borrowed(m),
            BlockMatrix::Csc(m) => std::borrow::Cow::Owned(m.to_block_csr()),
        }
    }
}

impl MatVec<[f64]> for BlockMatrix {
    fn matvec(&self, x: &[f64], y: &mut [f64]) {
        match self {
            BlockMatrix::Csr(m) => m.spmv(x, y),
            BlockMatrix::Csc(m) => m.spmv(x, y),
        }
    }
}

impl Indexing for BlockMatrix {
    fn nrows(&self) -> usize {
        self.n_cells() * self.block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2 cells, b = 2, dense 2x2 block pattern:
    //   [A B]      A = [[1,2],[3,4]]  B = [[0,1],[0,0]]
    //   [C D]      C = [[0,0],[1,0]]  D = [[5,6],[7,8]]
    fn blocks_cm() -> Vec<f64> {
        let a = [1.0, 3.0, 2.0, 4.0];
        let b = [0.0, 0.0, 1.0, 0.0];
        let c = [0.0, 1.0, 0.0, 0.0];
        let d = [5.0, 7.0, 6.0, 8.0];
        [a, b, c, d].concat()
    }

    fn csr_example() -> BlockCsrMatrix {
        BlockCsrMatrix::from_csr(2, 2, vec![0, 2, 4], vec![0, 1, 0, 1], blocks_cm())
    }

    fn csc_example() -> BlockCscMatrix {
        // Same matrix in CSC: column 0 holds A, C; column 1 holds B, D
        let a = [1.0, 3.0, 2.0, 4.0];
        let b = [0.0, 0.0, 1.0, 0.0];
        let c = [0.0, 1.0, 0.0, 0.0];
        let d = [5.0, 7.0, 6.0, 8.0];
        let blocks = [a, c, b, d].concat();
        BlockCscMatrix::from_csc(2, 2, vec![0, 2, 4], vec![0, 1, 0, 1], blocks)
    }

    #[test]
    fn csr_spmv_matches_dense() {
        let m = BlockMatrix::Csr(csr_example());
        let x = [1.0, 2.0, 3.0, 4.0];
        let mut y = [0.0; 4];
        m.matvec(&x, &mut y);
        // Dense rows: [1 2 0 1; 3 4 0 0; 0 0 5 6; 1 0 7 8]
        assert_eq!(y, [9.0, 11.0, 39.0, 54.0]);
    }

    #[test]
    fn csc_spmv_matches_csr() {
        let csr = BlockMatrix::Csr(csr_example());
        let csc = BlockMatrix::Csc(csc_example());
        let x = [0.5, -1.0, 2.0, 0.25];
        let mut y1 = [0.0; 4];
        let mut y2 = [0.0; 4];
        csr.matvec(&x, &mut y1);
        csc.matvec(&x, &mut y2);
        for (a, b) in y1.iter().zip(y2.iter()) {
            assert!((a - b).abs() < 1e-14);
        }
    }

    #[test]
    fn csc_to_csr_round_trip() {
        let csc = csc_example();
        let csr = csc.to_block_csr();
        let reference = csr_example();
        assert_eq!(csr.row_ptr(), reference.row_ptr());
        assert_eq!(csr.col_idx(), reference.col_idx());
        assert_eq!(csr.blocks(), reference.blocks());
    }

    #[test]
    fn diagonal_lookup() {
        let m = BlockMatrix::Csr(csr_example());
        let mut blk = [0.0; 4];
        assert!(m.diagonal_block_into(1, &mut blk));
        assert_eq!(blk, [5.0, 7.0, 6.0, 8.0]);
    }
}
