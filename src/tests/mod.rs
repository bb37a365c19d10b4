//! Scenario and property suites for the full solver.

use faer::rand::SeedableRng;
use faer::rand::rngs::StdRng;
use faer::stats::DistributionExt;
use faer::stats::prelude::{CwiseMatDistribution, StandardNormal};
use faer::{Col, Mat, sparse::SparseColMat};

use crate::linalg::sparse_ops::from_triplets;
use crate::{E, I, QuadraticProgram};

mod properties;

/// Sparse identity.
pub(crate) fn identity(n: usize) -> SparseColMat<I, E> {
    let triplets: Vec<(I, I, E)> = (0..n).map(|i| (i, i, 1.)).collect();
    from_triplets(n, n, &triplets).unwrap()
}

/// Upper triangle of a diagonal matrix.
pub(crate) fn diagonal(vals: &[E]) -> SparseColMat<I, E> {
    let triplets: Vec<(I, I, E)> = vals.iter().enumerate().map(|(i, &v)| (i, i, v)).collect();
    from_triplets(vals.len(), vals.len(), &triplets).unwrap()
}

/// An `m x n` constraint matrix with standard normal entries.
pub(crate) fn random_dense(rng: &mut StdRng, nrows: usize, ncols: usize) -> SparseColMat<I, E> {
    let dense: Mat<E> = CwiseMatDistribution {
        nrows,
        ncols,
        dist: StandardNormal,
    }
    .rand(rng);
    let mut triplets = Vec::with_capacity(nrows * ncols);
    for j in 0..ncols {
        for i in 0..nrows {
            triplets.push((i, j, dense[(i, j)]));
        }
    }
    from_triplets(nrows, ncols, &triplets).unwrap()
}

/// Upper triangle of the SPD matrix `G' G / n + 0.1 I`.
pub(crate) fn random_spd_upper(rng: &mut StdRng, n: usize) -> SparseColMat<I, E> {
    let g: Mat<E> = CwiseMatDistribution {
        nrows: n,
        ncols: n,
        dist: StandardNormal,
    }
    .rand(rng);
    let gram = g.transpose() * &g;
    let mut triplets = Vec::new();
    for j in 0..n {
        for i in 0..=j {
            let mut v = gram[(i, j)] / n as E;
            if i == j {
                v += 0.1;
            }
            triplets.push((i, j, v));
        }
    }
    from_triplets(n, n, &triplets).unwrap()
}

pub(crate) fn random_col(rng: &mut StdRng, n: usize) -> Col<E> {
    let dense: Mat<E> = CwiseMatDistribution {
        nrows: n,
        ncols: 1,
        dist: StandardNormal,
    }
    .rand(rng);
    Col::from_fn(n, |i| dense[(i, 0)])
}

/// Random strictly feasible QP: the bounds are placed around `A x0` for a
/// random `x0`, so a feasible point always exists.
pub(crate) fn random_feasible_qp(seed: u64, n: usize, m: usize) -> QuadraticProgram {
    let rng = &mut StdRng::seed_from_u64(seed);
    let p = random_spd_upper(rng, n);
    let a = random_dense(rng, m, n);
    let q = random_col(rng, n);
    let x0 = random_col(rng, n);
    let width = random_col(rng, m);

    let mut ax0 = Col::<E>::zeros(m);
    crate::linalg::sparse_ops::spmv(&mut ax0, 1., a.as_ref(), &x0, 0.);
    let l = Col::from_fn(m, |i| ax0[i] - width[i].abs() - 0.1);
    let u = Col::from_fn(m, |i| ax0[i] + width[i].abs() + 0.1);

    QuadraticProgram::new(p, q, a, l, u).unwrap()
}

/// `(||A x - z||_inf with z = clip(A x), ||P x + q + A' y||_inf)` on the
/// given (unscaled) problem parts.
pub(crate) fn kkt_residuals(
    p: &SparseColMat<I, E>,
    q: &Col<E>,
    a: &SparseColMat<I, E>,
    l: &Col<E>,
    u: &Col<E>,
    x: &Col<E>,
    y: &Col<E>,
) -> (E, E) {
    use crate::linalg::{sparse_ops, vector_ops};

    let m = a.nrows();
    let n = a.ncols();

    let mut ax = Col::<E>::zeros(m);
    sparse_ops::spmv(&mut ax, 1., a.as_ref(), x, 0.);
    let mut z = ax.to_owned();
    vector_ops::clip(&mut z, l.as_ref(), u.as_ref());
    let mut prim = 0.;
    for i in 0..m {
        prim = E::max(prim, (ax[i] - z[i]).abs());
    }

    let mut dual_vec = Col::<E>::zeros(n);
    sparse_ops::sym_spmv_upper(&mut dual_vec, 1., p.as_ref(), x, 0.);
    sparse_ops::spmv_transpose(&mut dual_vec, 1., a.as_ref(), y, 1.);
    let mut dual = 0.;
    for j in 0..n {
        dual = E::max(dual, (dual_vec[j] + q[j]).abs());
    }

    (prim, dual)
}
