//! Raw CSC kernels used by the scaler, the KKT backends, and the residual
//! computations.
//!
//! Symmetric matrices are stored as their upper triangle; the `sym_*` kernels
//! expand the implicit lower part on the fly.

use faer::Col;
use faer::sparse::{SparseColMat, SparseColMatRef, SymbolicSparseColMat, Triplet};

use crate::{E, I};

/// `y <- alpha * A * x + beta * y` for a general CSC matrix. As in BLAS,
/// `beta == 0` does not read `y`.
pub(crate) fn spmv(y: &mut Col<E>, alpha: E, a: SparseColMatRef<'_, I, E>, x: &Col<E>, beta: E) {
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let val = a.val();

    for i in 0..y.nrows() {
        y[i] = if beta == 0. { 0. } else { beta * y[i] };
    }
    for j in 0..a.ncols() {
        let xj = alpha * x[j];
        for k in col_ptr[j]..col_ptr[j + 1] {
            y[row_idx[k]] += val[k] * xj;
        }
    }
}

/// `y <- alpha * A' * x + beta * y` for a general CSC matrix.
pub(crate) fn spmv_transpose(
    y: &mut Col<E>,
    alpha: E,
    a: SparseColMatRef<'_, I, E>,
    x: &Col<E>,
    beta: E,
) {
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let val = a.val();

    for j in 0..a.ncols() {
        let mut acc = 0.;
        for k in col_ptr[j]..col_ptr[j + 1] {
            acc += val[k] * x[row_idx[k]];
        }
        y[j] = if beta == 0. { 0. } else { beta * y[j] } + alpha * acc;
    }
}

/// `y <- alpha * P * x + beta * y` where `P` is symmetric and stored as its
/// upper triangle. As in BLAS, `beta == 0` does not read `y`.
pub(crate) fn sym_spmv_upper(
    y: &mut Col<E>,
    alpha: E,
    p: SparseColMatRef<'_, I, E>,
    x: &Col<E>,
    beta: E,
) {
    let col_ptr = p.symbolic().col_ptr();
    let row_idx = p.symbolic().row_idx();
    let val = p.val();

    for i in 0..y.nrows() {
        y[i] = if beta == 0. { 0. } else { beta * y[i] };
    }
    for j in 0..p.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            let i = row_idx[k];
            y[i] += alpha * val[k] * x[j];
            if i != j {
                y[j] += alpha * val[k] * x[i];
            }
        }
    }
}

/// Per-column infinity norms of a general CSC matrix.
pub(crate) fn col_inf_norms(a: SparseColMatRef<'_, I, E>, out: &mut Col<E>) {
    let col_ptr = a.symbolic().col_ptr();
    let val = a.val();

    for j in 0..a.ncols() {
        let mut norm = 0.;
        for k in col_ptr[j]..col_ptr[j + 1] {
            norm = E::max(norm, val[k].abs());
        }
        out[j] = norm;
    }
}

/// Per-row infinity norms of a general CSC matrix.
pub(crate) fn row_inf_norms(a: SparseColMatRef<'_, I, E>, out: &mut Col<E>) {
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let val = a.val();

    for i in 0..out.nrows() {
        out[i] = 0.;
    }
    for j in 0..a.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            let i = row_idx[k];
            out[i] = E::max(out[i], val[k].abs());
        }
    }
}

/// Per-column infinity norms of a symmetric matrix stored as its upper
/// triangle; an entry contributes to both its row and column maxima.
pub(crate) fn sym_col_inf_norms_upper(p: SparseColMatRef<'_, I, E>, out: &mut Col<E>) {
    let col_ptr = p.symbolic().col_ptr();
    let row_idx = p.symbolic().row_idx();
    let val = p.val();

    for j in 0..out.nrows() {
        out[j] = 0.;
    }
    for j in 0..p.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            let i = row_idx[k];
            let v = val[k].abs();
            out[j] = E::max(out[j], v);
            if i != j {
                out[i] = E::max(out[i], v);
            }
        }
    }
}

/// Diagonal of a symmetric matrix stored as its upper triangle; absent
/// diagonal entries read as zero.
pub(crate) fn diag_upper(p: SparseColMatRef<'_, I, E>, out: &mut Col<E>) {
    let col_ptr = p.symbolic().col_ptr();
    let row_idx = p.symbolic().row_idx();
    let val = p.val();

    for j in 0..p.ncols() {
        out[j] = 0.;
        for k in col_ptr[j]..col_ptr[j + 1] {
            if row_idx[k] == j {
                out[j] = val[k];
            }
        }
    }
}

/// Diagonal of `A' * diag(rho) * A`, i.e. for each column `j` the sum of
/// `rho[i] * A[i, j]^2`.
pub(crate) fn atra_diag(a: SparseColMatRef<'_, I, E>, rho: &Col<E>, out: &mut Col<E>) {
    let col_ptr = a.symbolic().col_ptr();
    let row_idx = a.symbolic().row_idx();
    let val = a.val();

    for j in 0..a.ncols() {
        let mut acc = 0.;
        for k in col_ptr[j]..col_ptr[j + 1] {
            acc += rho[row_idx[k]] * val[k] * val[k];
        }
        out[j] = acc;
    }
}

/// Whether every stored entry satisfies `row <= col`.
pub(crate) fn is_upper_triangular(mat: SparseColMatRef<'_, I, E>) -> bool {
    let col_ptr = mat.symbolic().col_ptr();
    let row_idx = mat.symbolic().row_idx();

    for j in 0..mat.ncols() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            if row_idx[k] > j {
                return false;
            }
        }
    }
    true
}

/// Whether every stored value is finite.
pub(crate) fn values_finite(mat: SparseColMatRef<'_, I, E>) -> bool {
    mat.val().iter().all(|v| v.is_finite())
}

/// Extracts the upper triangle (entries with `row <= col`) of a square CSC
/// matrix as a new CSC matrix.
pub fn upper_triangle(mat: SparseColMatRef<'_, I, E>) -> SparseColMat<I, E> {
    let n = mat.ncols();
    let col_ptr = mat.symbolic().col_ptr();
    let row_idx = mat.symbolic().row_idx();
    let val = mat.val();

    let mut out_col_ptrs = Vec::with_capacity(n + 1);
    let mut out_row_indices = Vec::new();
    let mut out_values = Vec::new();

    out_col_ptrs.push(0);
    for j in 0..n {
        for k in col_ptr[j]..col_ptr[j + 1] {
            if row_idx[k] <= j {
                out_row_indices.push(row_idx[k]);
                out_values.push(val[k]);
            }
        }
        out_col_ptrs.push(out_row_indices.len());
    }

    // SAFETY: indices are copied from a valid CSC matrix in order, so they
    // stay sorted and in bounds within each column.
    let sym = unsafe {
        SymbolicSparseColMat::new_unchecked(n, n, out_col_ptrs, None, out_row_indices)
    };
    SparseColMat::<I, E>::new(sym, out_values)
}

/// Builds an `m x n` CSC matrix from triplets, merging duplicates.
pub fn from_triplets(
    nrows: usize,
    ncols: usize,
    triplets: &[(I, I, E)],
) -> Result<SparseColMat<I, E>, crate::SolverError> {
    let triplets = triplets
        .iter()
        .map(|&(i, j, v)| Triplet::new(i, j, v))
        .collect::<Vec<_>>();
    SparseColMat::try_new_from_triplets(nrows, ncols, triplets.as_slice()).map_err(|_| {
        crate::SolverError::InvalidData {
            reason: "triplet indices out of bounds",
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_a() -> SparseColMat<I, E> {
        // [ 1  0  2 ]
        // [ 0  3  0 ]
        from_triplets(2, 3, &[(0, 0, 1.), (1, 1, 3.), (0, 2, 2.)]).unwrap()
    }

    fn sample_p_upper() -> SparseColMat<I, E> {
        // Symmetric [ 2 -1; -1 2 ] stored as its upper triangle.
        from_triplets(2, 2, &[(0, 0, 2.), (0, 1, -1.), (1, 1, 2.)]).unwrap()
    }

    #[test]
    fn test_spmv() {
        let a = sample_a();
        let x = Col::from_fn(3, |i| [1.0, 2.0, 3.0][i]);
        let mut y = Col::from_fn(2, |_| 1.0);
        spmv(&mut y, 2.0, a.as_ref(), &x, -1.0);
        // A x = [7, 6]; y = 2*Ax - [1, 1] = [13, 11]
        assert_eq!(y[0], 13.0);
        assert_eq!(y[1], 11.0);
    }

    #[test]
    fn test_spmv_transpose() {
        let a = sample_a();
        let x = Col::from_fn(2, |i| [1.0, -1.0][i]);
        let mut y = Col::zeros(3);
        spmv_transpose(&mut y, 1.0, a.as_ref(), &x, 0.0);
        assert_eq!(y[0], 1.0);
        assert_eq!(y[1], -3.0);
        assert_eq!(y[2], 2.0);
    }

    #[test]
    fn test_sym_spmv_upper() {
        let p = sample_p_upper();
        let x = Col::from_fn(2, |i| [1.0, 2.0][i]);
        let mut y = Col::zeros(2);
        sym_spmv_upper(&mut y, 1.0, p.as_ref(), &x, 0.0);
        // Full P = [2 -1; -1 2], P x = [0, 3]
        assert_eq!(y[0], 0.0);
        assert_eq!(y[1], 3.0);
    }

    #[test]
    fn test_norm_reductions() {
        let a = sample_a();
        let mut cols = Col::zeros(3);
        let mut rows = Col::zeros(2);
        col_inf_norms(a.as_ref(), &mut cols);
        row_inf_norms(a.as_ref(), &mut rows);
        assert_eq!(cols[0], 1.0);
        assert_eq!(cols[1], 3.0);
        assert_eq!(cols[2], 2.0);
        assert_eq!(rows[0], 2.0);
        assert_eq!(rows[1], 3.0);

        let p = sample_p_upper();
        let mut sym = Col::zeros(2);
        sym_col_inf_norms_upper(p.as_ref(), &mut sym);
        assert_eq!(sym[0], 2.0);
        assert_eq!(sym[1], 2.0);
    }

    #[test]
    fn test_atra_diag() {
        let a = sample_a();
        let rho = Col::from_fn(2, |i| [2.0, 4.0][i]);
        let mut out = Col::zeros(3);
        atra_diag(a.as_ref(), &rho, &mut out);
        assert_eq!(out[0], 2.0);
        assert_eq!(out[1], 36.0);
        assert_eq!(out[2], 8.0);
    }

    #[test]
    fn test_upper_triangle_extraction() {
        let full = from_triplets(
            2,
            2,
            &[(0, 0, 2.), (1, 0, -1.), (0, 1, -1.), (1, 1, 2.)],
        )
        .unwrap();
        assert!(!is_upper_triangular(full.as_ref()));

        let upper = upper_triangle(full.as_ref());
        assert!(is_upper_triangular(upper.as_ref()));
        assert_eq!(upper.compute_nnz(), 3);
        assert_eq!(upper.get(0, 1), Some(&-1.0));
        assert_eq!(upper.get(1, 0), None);
    }
}
