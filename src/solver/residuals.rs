//! Residuals, termination tolerances, and infeasibility certificates.
//!
//! The workspace iterates live in the scaled space. With `x = D x_s`,
//! `z = E^-1 z_s`, `y = E y_s / c` the unscaled residuals are
//!
//! ```text
//! r_prim = || E^-1 (A x_s - z_s) ||_inf
//! r_dual = || D^-1 (P x_s + q + A' y_s) ||_inf / c
//! ```
//!
//! Certificate checks are evaluated on the unscaled deltas; the conditions
//! are homogeneous of degree one, so the common positive factors only need to
//! be applied consistently.

use faer::{unzip, zip};

use crate::linalg::{sparse_ops, vector_ops};
use crate::problem::QuadraticProgram;
use crate::scaling::Scaling;
use crate::settings::Settings;
use crate::solver::Workspace;
use crate::E;

/// Guard for divisions by delta norms.
const DIV_TOL: E = 1e-15;

pub(crate) struct Residuals {
    pub prim_sc: E,
    pub dual_sc: E,
    pub prim_us: E,
    pub dual_us: E,
    /// Tolerances in the mode selected by `scaled_termination`.
    pub eps_prim: E,
    pub eps_dual: E,
    /// Scaled norms feeding the step-parameter estimate.
    pub norm_ax_sc: E,
    pub norm_z_sc: E,
    pub norm_px_sc: E,
    pub norm_aty_sc: E,
    pub norm_q_sc: E,
}

impl Residuals {
    /// Residual pair in the mode selected by `scaled_termination`.
    pub(crate) fn checked(&self, scaled: bool) -> (E, E) {
        if scaled {
            (self.prim_sc, self.dual_sc)
        } else {
            (self.prim_us, self.dual_us)
        }
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.prim_sc.is_finite()
            && self.dual_sc.is_finite()
            && self.prim_us.is_finite()
            && self.dual_us.is_finite()
    }

    /// Whether the residuals meet `factor` times the tolerances.
    pub(crate) fn within(&self, scaled: bool, factor: E) -> bool {
        let (prim, dual) = self.checked(scaled);
        prim <= factor * self.eps_prim && dual <= factor * self.eps_dual
    }
}

/// Computes all residual quantities from the current `ax`, `px`, `aty`
/// products in the workspace.
pub(crate) fn compute_residuals(
    prob: &QuadraticProgram,
    scaling: &Scaling,
    work: &Workspace,
    settings: &Settings,
) -> Residuals {
    let mut prim_sc = 0.;
    let mut prim_us = 0.;
    zip!(work.ax.as_ref(), work.z.as_ref(), scaling.e_inv.as_ref()).for_each(
        |unzip!(ax, z, e_inv)| {
            let r = *ax - *z;
            prim_sc = E::max(prim_sc, r.abs());
            prim_us = E::max(prim_us, (*e_inv * r).abs());
        },
    );

    let mut dual_sc = 0.;
    let mut dual_us = 0.;
    zip!(
        work.px.as_ref(),
        prob.q.as_ref(),
        work.aty.as_ref(),
        scaling.d_inv.as_ref()
    )
    .for_each(|unzip!(px, q, aty, d_inv)| {
        let r = *px + *q + *aty;
        dual_sc = E::max(dual_sc, r.abs());
        dual_us = E::max(dual_us, (*d_inv * r).abs());
    });
    dual_us *= scaling.c_inv;

    let norm_ax_sc = vector_ops::inf_norm(work.ax.as_ref());
    let norm_z_sc = vector_ops::inf_norm(work.z.as_ref());
    let norm_px_sc = vector_ops::inf_norm(work.px.as_ref());
    let norm_aty_sc = vector_ops::inf_norm(work.aty.as_ref());
    let norm_q_sc = vector_ops::inf_norm(prob.q.as_ref());

    let (eps_prim, eps_dual) = if settings.scaled_termination {
        (
            settings.eps_abs + settings.eps_rel * E::max(norm_ax_sc, norm_z_sc),
            settings.eps_abs
                + settings.eps_rel * E::max(E::max(norm_px_sc, norm_aty_sc), norm_q_sc),
        )
    } else {
        let norm_ax = vector_ops::scaled_inf_norm(scaling.e_inv.as_ref(), work.ax.as_ref());
        let norm_z = vector_ops::scaled_inf_norm(scaling.e_inv.as_ref(), work.z.as_ref());
        let norm_px = vector_ops::scaled_inf_norm(scaling.d_inv.as_ref(), work.px.as_ref());
        let norm_aty = vector_ops::scaled_inf_norm(scaling.d_inv.as_ref(), work.aty.as_ref());
        let norm_q = vector_ops::scaled_inf_norm(scaling.d_inv.as_ref(), prob.q.as_ref());
        (
            settings.eps_abs + settings.eps_rel * E::max(norm_ax, norm_z),
            settings.eps_abs
                + settings.eps_rel
                    * scaling.c_inv
                    * E::max(E::max(norm_px, norm_aty), norm_q),
        )
    };

    Residuals {
        prim_sc,
        dual_sc,
        prim_us,
        dual_us,
        eps_prim,
        eps_dual,
        norm_ax_sc,
        norm_z_sc,
        norm_px_sc,
        norm_aty_sc,
        norm_q_sc,
    }
}

/// Primal infeasibility test on the last dual increment: a certificate
/// `dy` satisfies `A' dy = 0` with negative support
/// `u' max(dy, 0) + l' min(dy, 0) < 0`, up to `eps` relative to
/// `||dy||_inf`. A positive component against an infinite bound disproves
/// the certificate outright.
pub(crate) fn is_primal_infeasible(
    prob: &QuadraticProgram,
    scaling: &Scaling,
    work: &mut Workspace,
    eps: E,
) -> bool {
    let m = prob.get_n_cons();

    // Unscaled dual increment into scratch_m.
    zip!(
        work.scratch_m.as_mut(),
        work.delta_y.as_ref(),
        scaling.e.as_ref()
    )
    .for_each(|unzip!(out, dy, e)| *out = scaling.c_inv * *e * *dy);

    let norm_dy = vector_ops::inf_norm(work.scratch_m.as_ref());
    if norm_dy <= DIV_TOL {
        return false;
    }

    // Support function of the bounds along dy.
    let mut support = 0.;
    for i in 0..m {
        let dy = work.scratch_m[i];
        let l = scaling.e_inv[i] * prob.l[i];
        let u = scaling.e_inv[i] * prob.u[i];
        if dy > eps * norm_dy {
            if u.is_infinite() {
                return false;
            }
            support += u * dy;
        } else if dy < -eps * norm_dy {
            if l.is_infinite() {
                return false;
            }
            support += l * dy;
        }
    }
    if support > -eps * norm_dy {
        return false;
    }

    // || A' dy ||_inf with A' dy = D^-1 (A_s' dy_s) / c.
    sparse_ops::spmv_transpose(&mut work.scratch_n, 1., prob.A.as_ref(), &work.delta_y, 0.);
    let norm_atdy = scaling.c_inv
        * vector_ops::scaled_inf_norm(scaling.d_inv.as_ref(), work.scratch_n.as_ref());

    norm_atdy <= eps * norm_dy
}

/// Dual infeasibility test on the last primal increment: a certificate `dx`
/// satisfies `P dx = 0`, `q' dx < 0`, and `A dx` lies in the recession cone
/// of the bounds, up to `eps` relative to `||dx||_inf`.
pub(crate) fn is_dual_infeasible(
    prob: &QuadraticProgram,
    scaling: &Scaling,
    work: &mut Workspace,
    eps: E,
) -> bool {
    let m = prob.get_n_cons();

    // Unscaled primal increment into scratch_n.
    zip!(
        work.scratch_n.as_mut(),
        work.delta_x.as_ref(),
        scaling.d.as_ref()
    )
    .for_each(|unzip!(out, dx, d)| *out = *d * *dx);

    let norm_dx = vector_ops::inf_norm(work.scratch_n.as_ref());
    if norm_dx <= DIV_TOL {
        return false;
    }

    // q' dx = q_s' dx_s / c.
    let qdx = scaling.c_inv * vector_ops::dot(prob.q.as_ref(), work.delta_x.as_ref());
    if qdx > -eps * norm_dx {
        return false;
    }

    // || P dx ||_inf with P dx = D^-1 (P_s dx_s) / c.
    sparse_ops::sym_spmv_upper(&mut work.scratch_n2, 1., prob.P.as_ref(), &work.delta_x, 0.);
    let norm_pdx = scaling.c_inv
        * vector_ops::scaled_inf_norm(scaling.d_inv.as_ref(), work.scratch_n2.as_ref());
    if norm_pdx > eps * norm_dx {
        return false;
    }

    // A dx = E^-1 (A_s dx_s), checked row by row against the bound pattern.
    sparse_ops::spmv(&mut work.scratch_m, 1., prob.A.as_ref(), &work.delta_x, 0.);
    for i in 0..m {
        let adx = scaling.e_inv[i] * work.scratch_m[i];
        let lower_bounded = prob.l[i].is_finite();
        let upper_bounded = prob.u[i].is_finite();
        let within = |v: E| v.abs() <= eps * norm_dx;
        let ok = match (lower_bounded, upper_bounded) {
            // Two-sided row: the direction must not move the row at all.
            (true, true) => within(adx),
            // Upper bound only: the direction must not increase the row.
            (false, true) => adx <= eps * norm_dx,
            // Lower bound only: the direction must not decrease the row.
            (true, false) => adx >= -eps * norm_dx,
            (false, false) => true,
        };
        if !ok {
            return false;
        }
    }

    true
}
