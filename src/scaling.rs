//! Ruiz equilibration of the problem data.
//!
//! The scaled problem is `P <- c D P D`, `q <- c D q`, `A <- E A D`,
//! `l, u <- E l, E u`, chosen so the row/column infinity norms of the
//! composite `[P A'; A 0]` are approximately one. The iterate mapping is
//! `x = D x_s`, `z = E^-1 z_s`, `y = E y_s / c`.

use faer::prelude::ReborrowMut;
use faer::{Col, ColRef};

use crate::linalg::{sparse_ops, vector_ops};
use crate::problem::QuadraticProgram;
use crate::E;

const MIN_SCALING: E = 1e-4;
const MAX_SCALING: E = 1e4;

/// Diagonal scaling computed by [`Scaling::ruiz`]. All entries and the cost
/// scalar are strictly positive and finite.
pub struct Scaling {
    pub(crate) d: Col<E>,
    pub(crate) d_inv: Col<E>,
    pub(crate) e: Col<E>,
    pub(crate) e_inv: Col<E>,
    pub(crate) c: E,
    pub(crate) c_inv: E,
}

impl Scaling {
    /// Identity scaling; used when equilibration is disabled.
    pub(crate) fn identity(n: usize, m: usize) -> Self {
        Self {
            d: Col::from_fn(n, |_| 1.),
            d_inv: Col::from_fn(n, |_| 1.),
            e: Col::from_fn(m, |_| 1.),
            e_inv: Col::from_fn(m, |_| 1.),
            c: 1.,
            c_inv: 1.,
        }
    }

    /// Equilibrates the problem in place over `iters` passes and returns the
    /// accumulated scaling.
    pub(crate) fn ruiz(prob: &mut QuadraticProgram, iters: usize) -> Self {
        let (n, m) = prob.get_dims();

        let mut d = Col::from_fn(n, |_| 1.);
        let mut e = Col::from_fn(m, |_| 1.);
        let mut c = 1.;

        let mut dt = Col::<E>::zeros(n);
        let mut et = Col::<E>::zeros(m);
        let mut a_col_norms = Col::<E>::zeros(n);

        for _ in 0..iters {
            // Column norms of [P; A] and row norms of A.
            sparse_ops::sym_col_inf_norms_upper(prob.P.as_ref(), &mut dt);
            sparse_ops::col_inf_norms(prob.A.as_ref(), &mut a_col_norms);
            for j in 0..n {
                dt[j] = inv_sqrt_multiplier(E::max(dt[j], a_col_norms[j]));
            }
            sparse_ops::row_inf_norms(prob.A.as_ref(), &mut et);
            for i in 0..m {
                et[i] = inv_sqrt_multiplier(et[i]);
            }

            scale_problem(prob, dt.as_ref(), et.as_ref());
            for j in 0..n {
                d[j] *= dt[j];
            }
            for i in 0..m {
                e[i] *= et[i];
            }

            // Cost scaling: balance the objective against the constraints.
            sparse_ops::sym_col_inf_norms_upper(prob.P.as_ref(), &mut dt);
            let mut mean_p = 0.;
            for j in 0..n {
                mean_p += dt[j];
            }
            mean_p /= n as E;
            let norm_q = vector_ops::inf_norm(prob.q.as_ref());
            let ct = 1. / E::max(E::max(mean_p, norm_q), 1.);

            scale_cost(prob, ct);
            c *= ct;
        }

        Self {
            d_inv: vector_ops::cwise_inverse(d.as_ref()),
            e_inv: vector_ops::cwise_inverse(e.as_ref()),
            c_inv: 1. / c,
            d,
            e,
            c,
        }
    }

    /// Maps a primal iterate of the scaled problem back to the original one.
    pub(crate) fn unscale_x(&self, x_s: ColRef<'_, E>) -> Col<E> {
        vector_ops::cwise_multiply(self.d.as_ref(), x_s)
    }

    /// Maps a dual iterate of the scaled problem back to the original one.
    pub(crate) fn unscale_y(&self, y_s: ColRef<'_, E>) -> Col<E> {
        let mut y = vector_ops::cwise_multiply(self.e.as_ref(), y_s);
        for i in 0..y.nrows() {
            y[i] *= self.c_inv;
        }
        y
    }

    pub(crate) fn unscale_z(&self, z_s: ColRef<'_, E>) -> Col<E> {
        vector_ops::cwise_multiply(self.e_inv.as_ref(), z_s)
    }

    /// Maps a caller-supplied primal iterate into the scaled space.
    pub(crate) fn scale_x(&self, x: ColRef<'_, E>) -> Col<E> {
        vector_ops::cwise_multiply(self.d_inv.as_ref(), x)
    }

    /// Maps an unscaled constraint-space vector into the scaled space.
    pub(crate) fn scale_z(&self, z: ColRef<'_, E>) -> Col<E> {
        vector_ops::cwise_multiply(self.e.as_ref(), z)
    }

    /// Maps a caller-supplied dual iterate into the scaled space.
    pub(crate) fn scale_y(&self, y: ColRef<'_, E>) -> Col<E> {
        let mut y_s = vector_ops::cwise_multiply(self.e_inv.as_ref(), y);
        for i in 0..y_s.nrows() {
            y_s[i] *= self.c;
        }
        y_s
    }
}

/// Multiplier `1/sqrt(norm)` with the norm guarded into
/// `[MIN_SCALING, MAX_SCALING]`; degenerate norms leave the coordinate
/// untouched.
fn inv_sqrt_multiplier(norm: E) -> E {
    if !norm.is_finite() || norm < MIN_SCALING {
        1.
    } else {
        1. / E::min(norm, MAX_SCALING).sqrt()
    }
}

/// `P <- Dt P Dt`, `q <- Dt q`, `A <- Et A Dt`, `l, u <- Et l, Et u`.
fn scale_problem(prob: &mut QuadraticProgram, dt: ColRef<'_, E>, et: ColRef<'_, E>) {
    let n = prob.get_n_vars();
    let m = prob.get_n_cons();

    {
        let pm = prob.P.rb_mut();
        let col_ptr = pm.symbolic().col_ptr();
        let row_idx = pm.symbolic().row_idx();
        let vals = pm.val_mut();
        for j in 0..n {
            for k in col_ptr[j]..col_ptr[j + 1] {
                vals[k] *= dt[row_idx[k]] * dt[j];
            }
        }
    }
    {
        let am = prob.A.rb_mut();
        let col_ptr = am.symbolic().col_ptr();
        let row_idx = am.symbolic().row_idx();
        let vals = am.val_mut();
        for j in 0..n {
            for k in col_ptr[j]..col_ptr[j + 1] {
                vals[k] *= et[row_idx[k]] * dt[j];
            }
        }
    }
    for j in 0..n {
        prob.q[j] *= dt[j];
    }
    for i in 0..m {
        prob.l[i] *= et[i];
        prob.u[i] *= et[i];
    }
}

/// `P <- ct P`, `q <- ct q`.
fn scale_cost(prob: &mut QuadraticProgram, ct: E) {
    {
        let pm = prob.P.rb_mut();
        let vals = pm.val_mut();
        for v in vals.iter_mut() {
            *v *= ct;
        }
    }
    for j in 0..prob.get_n_vars() {
        prob.q[j] *= ct;
    }
}
