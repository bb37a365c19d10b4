//! Active-set polishing.
//!
//! After convergence, the rows at their bounds are fixed to equalities and
//! the resulting equality-constrained QP is solved exactly:
//!
//! ```text
//! [ P + delta I    A_act'    ] [ x* ]   [ -q    ]
//! [ A_act         -delta I   ] [ y* ] = [ b_act ]
//! ```
//!
//! followed by iterative refinement against the unregularized KKT matrix.
//! The refined iterate is committed only if neither residual degrades; any
//! failure along the way keeps the ADMM iterate and reports an unsuccessful
//! polish.

use std::time::Instant;

use faer::prelude::ReborrowMut;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use faer::{Col, Mat};

use crate::linalg::ldlt::SimplicialLdlt;
use crate::linalg::{sparse_ops, vector_ops};
use crate::solver::AdmmSolver;
use crate::{E, I, PolishStatus, SolverError};

pub(crate) fn polish(solver: &mut AdmmSolver) {
    let t_start = Instant::now();
    let committed = try_polish(solver);
    solver.info.polish_status = match committed {
        Ok(true) => PolishStatus::Successful,
        Ok(false) => PolishStatus::Unsuccessful,
        Err(err) => {
            log::debug!("polish failed: {err}");
            PolishStatus::Unsuccessful
        }
    };
    solver.info.polish_time = t_start.elapsed();
}

fn try_polish(solver: &mut AdmmSolver) -> Result<bool, SolverError> {
    let (n, m) = solver.prob.get_dims();
    let delta = solver.settings.delta;

    // Polishing works on the original problem: peel the scaling off copies
    // of the data and the iterate.
    let p = unscale_p(solver);
    let a = unscale_a(solver);
    let q = {
        let mut q = vector_ops::cwise_multiply(
            solver.scaling.d_inv.as_ref(),
            solver.prob.q.as_ref(),
        );
        for j in 0..n {
            q[j] *= solver.scaling.c_inv;
        }
        q
    };
    let l = solver.scaling.unscale_z(solver.prob.l.as_ref());
    let u = solver.scaling.unscale_z(solver.prob.u.as_ref());
    let x = solver.scaling.unscale_x(solver.work.x.as_ref());
    let y = solver.scaling.unscale_y(solver.work.y.as_ref());
    let z = solver.scaling.unscale_z(solver.work.z.as_ref());

    let (admm_prim, admm_dual) = unscaled_residuals(&p, &a, &q, &x, &y, &z);

    // Active-set identification. Equality rows are always kept; otherwise a
    // row is active when its multiplier or its slack says so, and a finite
    // bound exists on that side.
    let eps_act = E::max(1e-8, 1e-6 * vector_ops::inf_norm(y.as_ref()));
    let mut active: Vec<I> = Vec::new();
    let mut b_act: Vec<E> = Vec::new();
    for i in 0..m {
        if l[i] == u[i] {
            active.push(i);
            b_act.push(l[i]);
            continue;
        }
        let lower = l[i].is_finite() && (y[i] < -eps_act || z[i] - l[i] < eps_act);
        let upper = u[i].is_finite() && (y[i] > eps_act || u[i] - z[i] < eps_act);
        match (lower, upper) {
            (true, true) => {
                active.push(i);
                b_act.push(if y[i] <= 0. { l[i] } else { u[i] });
            }
            (true, false) => {
                active.push(i);
                b_act.push(l[i]);
            }
            (false, true) => {
                active.push(i);
                b_act.push(u[i]);
            }
            (false, false) => {}
        }
    }
    let n_act = active.len();

    let a_csr = a.to_row_major().map_err(|_| SolverError::Numerical {
        reason: "constraint matrix transpose failed",
    })?;
    let a_row_ptr = a_csr.symbolic().row_ptr();
    let a_col_idx = a_csr.symbolic().col_idx();
    let a_values = a_csr.val();

    // Upper triangle of the regularized reduced KKT system.
    let kkt = {
        let p_col_ptr = p.symbolic().col_ptr();
        let p_row_idx = p.symbolic().row_idx();
        let p_values = p.val();

        let mut col_ptrs = Vec::with_capacity(n + n_act + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();

        col_ptrs.push(0);
        for j in 0..n {
            let mut diag = 0.;
            for k in p_col_ptr[j]..p_col_ptr[j + 1] {
                let i = p_row_idx[k];
                if i == j {
                    diag = p_values[k];
                } else {
                    row_indices.push(i);
                    values.push(p_values[k]);
                }
            }
            row_indices.push(j);
            values.push(diag + delta);
            col_ptrs.push(row_indices.len());
        }
        for (k, &row) in active.iter().enumerate() {
            for t in a_row_ptr[row]..a_row_ptr[row + 1] {
                row_indices.push(a_col_idx[t]);
                values.push(a_values[t]);
            }
            row_indices.push(n + k);
            values.push(-delta);
            col_ptrs.push(row_indices.len());
        }

        unsafe {
            let sym = SymbolicSparseColMat::new_unchecked(
                n + n_act,
                n + n_act,
                col_ptrs,
                None,
                row_indices,
            );
            SparseColMat::<I, E>::new(sym, values)
        }
    };

    let ldlt = SimplicialLdlt::try_new(kkt.as_ref())?;

    let mut rhs = Mat::<E>::zeros(n + n_act, 1);
    for j in 0..n {
        rhs[(j, 0)] = -q[j];
    }
    for (k, b) in b_act.iter().enumerate() {
        rhs[(n + k, 0)] = *b;
    }

    let mut sol = rhs.clone();
    ldlt.solve_in_place(sol.as_mut())?;

    // Refinement against the unregularized KKT matrix, reusing the
    // factorization of the regularized one.
    for _ in 0..solver.settings.polish_refine_iter {
        let mut resid = rhs.clone();
        // resid <- rhs - [P x + A_act' lam; A_act x]
        {
            let xs = Col::<E>::from_fn(n, |j| sol[(j, 0)]);
            let mut px = Col::<E>::zeros(n);
            sparse_ops::sym_spmv_upper(&mut px, 1., p.as_ref(), &xs, 0.);
            for j in 0..n {
                resid[(j, 0)] -= px[j];
            }
            for (k, &row) in active.iter().enumerate() {
                let lam = sol[(n + k, 0)];
                let mut ax_row = 0.;
                for t in a_row_ptr[row]..a_row_ptr[row + 1] {
                    let j = a_col_idx[t];
                    resid[(j, 0)] -= a_values[t] * lam;
                    ax_row += a_values[t] * xs[j];
                }
                resid[(n + k, 0)] -= ax_row;
            }
        }
        ldlt.solve_in_place(resid.as_mut())?;
        for t in 0..n + n_act {
            sol[(t, 0)] += resid[(t, 0)];
        }
    }

    let x_pol = Col::<E>::from_fn(n, |j| sol[(j, 0)]);
    let mut y_pol = Col::<E>::zeros(m);
    for (k, &row) in active.iter().enumerate() {
        y_pol[row] = sol[(n + k, 0)];
    }

    let mut ax = Col::<E>::zeros(m);
    sparse_ops::spmv(&mut ax, 1., a.as_ref(), &x_pol, 0.);
    let mut z_pol = ax.to_owned();
    vector_ops::clip(&mut z_pol, l.as_ref(), u.as_ref());

    let (pol_prim, pol_dual) = unscaled_residuals(&p, &a, &q, &x_pol, &y_pol, &z_pol);
    if !pol_prim.is_finite() || !pol_dual.is_finite() {
        return Ok(false);
    }
    if pol_prim > admm_prim || pol_dual > admm_dual {
        return Ok(false);
    }

    // Commit: map the refined iterate back into the scaled workspace.
    solver.work.x = solver.scaling.scale_x(x_pol.as_ref());
    solver.work.y = solver.scaling.scale_y(y_pol.as_ref());
    solver.work.z = solver.scaling.scale_z(z_pol.as_ref());
    solver.refresh_products();

    solver.info.prim_res = pol_prim;
    solver.info.dual_res = pol_dual;
    let mut px = Col::<E>::zeros(n);
    sparse_ops::sym_spmv_upper(&mut px, 1., p.as_ref(), &x_pol, 0.);
    solver.info.obj_val =
        0.5 * vector_ops::dot(x_pol.as_ref(), px.as_ref()) + vector_ops::dot(q.as_ref(), x_pol.as_ref());

    Ok(true)
}

/// `(||A x - z||_inf, ||P x + q + A' y||_inf)` on unscaled data.
fn unscaled_residuals(
    p: &SparseColMat<I, E>,
    a: &SparseColMat<I, E>,
    q: &Col<E>,
    x: &Col<E>,
    y: &Col<E>,
    z: &Col<E>,
) -> (E, E) {
    let m = a.nrows();
    let n = a.ncols();

    let mut ax = Col::<E>::zeros(m);
    sparse_ops::spmv(&mut ax, 1., a.as_ref(), x, 0.);
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

/// Copy of `P` with the equilibration peeled off.
fn unscale_p(solver: &AdmmSolver) -> SparseColMat<I, E> {
    let mut p = solver.prob.P.to_owned();
    let d_inv = &solver.scaling.d_inv;
    let c_inv = solver.scaling.c_inv;
    let pm = p.rb_mut();
    let col_ptr = pm.symbolic().col_ptr();
    let row_idx = pm.symbolic().row_idx();
    let vals = pm.val_mut();
    for j in 0..solver.prob.get_n_vars() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            vals[k] *= c_inv * d_inv[row_idx[k]] * d_inv[j];
        }
    }
    p
}

/// Copy of `A` with the equilibration peeled off.
fn unscale_a(solver: &AdmmSolver) -> SparseColMat<I, E> {
    let mut a = solver.prob.A.to_owned();
    let d_inv = &solver.scaling.d_inv;
    let e_inv = &solver.scaling.e_inv;
    let am = a.rb_mut();
    let col_ptr = am.symbolic().col_ptr();
    let row_idx = am.symbolic().row_idx();
    let vals = am.val_mut();
    for j in 0..solver.prob.get_n_vars() {
        for k in col_ptr[j]..col_ptr[j + 1] {
            vals[k] *= e_inv[row_idx[k]] * d_inv[j];
        }
    }
    a
}
