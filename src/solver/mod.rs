//! The ADMM engine.
//!
//! Each iteration alternates a KKT solve with a box projection and a dual
//! update:
//!
//! ```text
//! (x~, nu) <- KKT solve                       (see `linsys`)
//! z~       <- z + R^-1 (nu - y)
//! x        <- alpha x~ + (1 - alpha) x
//! z        <- clip(alpha z~ + (1 - alpha) z + R^-1 y, l, u)
//! y        <- y + R (alpha z~ + (1 - alpha) z_prev - z)
//! ```
//!
//! Residuals are checked every `check_termination` iterations; the step
//! parameter adapts from the primal/dual residual balance.

use std::time::{Duration, Instant};

use faer::prelude::ReborrowMut;
use faer::{Col, ColRef, unzip, zip};

use crate::callback::IterationStats;
use crate::linalg::{sparse_ops, vector_ops};
use crate::linsys::{KktBackend, KktSolver};
use crate::problem::QuadraticProgram;
use crate::scaling::Scaling;
use crate::settings::Settings;
use crate::{E, I, Info, PolishStatus, Solution, SolverError, SolverHooks, Status};

pub(crate) mod polish;
pub(crate) mod residuals;

pub(crate) const RHO_MIN: E = 1e-6;
pub(crate) const RHO_MAX: E = 1e6;
const DIV_TOL: E = 1e-15;
/// First adaptation point of the doubling schedule used when
/// `adaptive_rho_interval` is zero.
const ADAPTIVE_FIRST_CHECK: usize = 25;

/// Iterate state and preallocated work vectors. Everything lives in the
/// scaled space.
pub(crate) struct Workspace {
    pub x: Col<E>,
    pub y: Col<E>,
    pub z: Col<E>,
    pub x_tilde: Col<E>,
    pub nu: Col<E>,
    pub z_tilde: Col<E>,
    pub z_prev: Col<E>,
    pub delta_x: Col<E>,
    pub delta_y: Col<E>,
    pub ax: Col<E>,
    pub px: Col<E>,
    pub aty: Col<E>,
    pub rhs_x: Col<E>,
    pub rhs_z: Col<E>,
    pub rho_vec: Col<E>,
    pub rho_inv_vec: Col<E>,
    pub scratch_n: Col<E>,
    pub scratch_n2: Col<E>,
    pub scratch_m: Col<E>,
}

impl Workspace {
    fn new(n: usize, m: usize) -> Self {
        Self {
            x: Col::zeros(n),
            y: Col::zeros(m),
            z: Col::zeros(m),
            x_tilde: Col::zeros(n),
            nu: Col::zeros(m),
            z_tilde: Col::zeros(m),
            z_prev: Col::zeros(m),
            delta_x: Col::zeros(n),
            delta_y: Col::zeros(m),
            ax: Col::zeros(m),
            px: Col::zeros(n),
            aty: Col::zeros(n),
            rhs_x: Col::zeros(n),
            rhs_z: Col::zeros(m),
            rho_vec: Col::zeros(m),
            rho_inv_vec: Col::zeros(m),
            scratch_n: Col::zeros(n),
            scratch_n2: Col::zeros(n),
            scratch_m: Col::zeros(m),
        }
    }

    fn cold_start(&mut self) {
        vector_ops::fill(&mut self.x, 0.);
        vector_ops::fill(&mut self.y, 0.);
        vector_ops::fill(&mut self.z, 0.);
        vector_ops::fill(&mut self.delta_x, 0.);
        vector_ops::fill(&mut self.delta_y, 0.);
    }
}

/// Operator-splitting QP solver.
///
/// Owns the (scaled) problem data, the iterate state, and the KKT backend.
/// Created by [`AdmmSolver::setup`], driven by [`AdmmSolver::solve`], and
/// mutated only through its update operations. All owned resources are
/// released on drop.
pub struct AdmmSolver {
    pub(crate) prob: QuadraticProgram,
    pub(crate) settings: Settings,
    pub(crate) scaling: Scaling,
    pub(crate) linsys: KktBackend,
    pub(crate) work: Workspace,
    pub(crate) info: Info,
    pub(crate) rho: E,
    next_adaptive_check: usize,
}

impl AdmmSolver {
    /// Validates, scales, and allocates the solver state. This is the only
    /// structural allocation site; later updates reuse the existing storage
    /// unless they change the problem values.
    pub fn setup(prob: QuadraticProgram, settings: Settings) -> Result<Self, SolverError> {
        settings.validate()?;

        let t_start = Instant::now();
        let (n, m) = prob.get_dims();

        let mut prob = prob;
        let scaling = if settings.scaling > 0 {
            Scaling::ruiz(&mut prob, settings.scaling)
        } else {
            Scaling::identity(n, m)
        };

        let rho = settings.rho.clamp(RHO_MIN, RHO_MAX);
        let mut work = Workspace::new(n, m);
        build_rho_vec(
            &prob,
            rho,
            settings.rho_eq_scale,
            &mut work.rho_vec,
            &mut work.rho_inv_vec,
        );

        let linsys = KktBackend::new(settings.linsys, &prob, settings.sigma, &work.rho_vec)?;

        let info = Info {
            rho_estimate: rho,
            setup_time: t_start.elapsed(),
            ..Info::default()
        };

        Ok(Self {
            prob,
            settings,
            scaling,
            linsys,
            work,
            info,
            rho,
            next_adaptive_check: ADAPTIVE_FIRST_CHECK,
        })
    }

    /// Runs the iteration to termination with silent hooks.
    pub fn solve(&mut self) -> Status {
        let mut hooks = SolverHooks::default();
        self.solve_with_hooks(&mut hooks)
    }

    /// Runs the iteration to termination, consulting the given hooks at the
    /// top of every iteration.
    pub fn solve_with_hooks(&mut self, hooks: &mut SolverHooks) -> Status {
        let t_start = Instant::now();
        hooks.callback.init();
        hooks.terminator.initialize();

        self.info.iterations = 0;
        self.info.rho_updates = 0;
        self.info.polish_status = PolishStatus::Skipped;
        self.info.polish_time = Duration::ZERO;

        if !self.settings.warm_start {
            self.work.cold_start();
        }
        self.next_adaptive_check = if self.settings.adaptive_rho_interval == 0 {
            ADAPTIVE_FIRST_CHECK
        } else {
            self.settings.adaptive_rho_interval
        };

        let check_every = usize::max(1, self.settings.check_termination);

        let mut status = Status::MaxIterReached;
        let mut checked = false;

        for iter in 1..=self.settings.max_iter {
            if let Some(s) = hooks.terminator.terminate() {
                status = s;
                break;
            }
            if let Some(limit) = self.settings.time_limit {
                if t_start.elapsed() >= limit {
                    status = Status::TimeLimit;
                    break;
                }
            }

            if let Err(err) = self.admm_step() {
                log::warn!("iteration {iter} failed: {err}");
                status = Status::NumericalError;
                self.info.iterations = iter;
                break;
            }
            self.info.iterations = iter;

            if iter % check_every == 0 || iter == self.settings.max_iter {
                self.refresh_products();
                let res = residuals::compute_residuals(
                    &self.prob,
                    &self.scaling,
                    &self.work,
                    &self.settings,
                );
                if !res.is_finite() {
                    status = Status::NumericalError;
                    break;
                }
                checked = true;
                self.linsys.set_residual_hint(res.prim_sc, res.dual_sc);

                let stats = IterationStats {
                    iteration: iter,
                    prim_res: res.prim_us,
                    dual_res: res.dual_us,
                    rho: self.rho,
                };
                hooks.callback.call(&stats);
                if self.settings.verbose {
                    log::info!(
                        "iter {:5}  prim res {:9.2e}  dual res {:9.2e}  rho {:8.2e}",
                        iter,
                        stats.prim_res,
                        stats.dual_res,
                        self.rho
                    );
                }

                if res.within(self.settings.scaled_termination, 1.) {
                    status = Status::Solved;
                    break;
                }
                if residuals::is_primal_infeasible(
                    &self.prob,
                    &self.scaling,
                    &mut self.work,
                    self.settings.eps_prim_inf,
                ) {
                    status = Status::PrimalInfeasible;
                    break;
                }
                if residuals::is_dual_infeasible(
                    &self.prob,
                    &self.scaling,
                    &mut self.work,
                    self.settings.eps_dual_inf,
                ) {
                    status = Status::DualInfeasible;
                    break;
                }

                if self.settings.adaptive_rho {
                    if let Err(err) = self.maybe_adapt_rho(&res, iter) {
                        log::warn!("step parameter update failed: {err}");
                        status = Status::NumericalError;
                        break;
                    }
                }
            }
        }

        // Loosened re-check when the iteration budget ran out.
        if status == Status::MaxIterReached && checked {
            self.refresh_products();
            let res = residuals::compute_residuals(
                &self.prob,
                &self.scaling,
                &self.work,
                &self.settings,
            );
            if res.is_finite() {
                if res.within(self.settings.scaled_termination, 10.) {
                    status = Status::SolvedInaccurate;
                } else if residuals::is_primal_infeasible(
                    &self.prob,
                    &self.scaling,
                    &mut self.work,
                    10. * self.settings.eps_prim_inf,
                ) {
                    status = Status::PrimalInfeasibleInaccurate;
                } else if residuals::is_dual_infeasible(
                    &self.prob,
                    &self.scaling,
                    &mut self.work,
                    10. * self.settings.eps_dual_inf,
                ) {
                    status = Status::DualInfeasibleInaccurate;
                }
            }
        }

        self.finalize(status);
        self.info.solve_time = t_start.elapsed();

        if self.info.status.is_solved() && self.settings.polishing {
            polish::polish(self);
        }

        self.info.status
    }

    /// One ADMM step on the scaled problem.
    fn admm_step(&mut self) -> Result<(), SolverError> {
        let sigma = self.settings.sigma;
        let alpha = self.settings.alpha;

        {
            let w = &mut self.work;
            vector_ops::copy_to(w.z.as_ref(), &mut w.z_prev);

            zip!(w.rhs_x.as_mut(), w.x.as_ref(), self.prob.q.as_ref())
                .for_each(|unzip!(r, x, q)| *r = sigma * *x - *q);
            zip!(
                w.rhs_z.as_mut(),
                w.z.as_ref(),
                w.rho_inv_vec.as_ref(),
                w.y.as_ref()
            )
            .for_each(|unzip!(r, z, ri, y)| *r = *z - *ri * *y);
        }

        self.linsys.solve(
            &self.prob,
            &self.work.rhs_x,
            &self.work.rhs_z,
            &mut self.work.x_tilde,
            &mut self.work.nu,
        )?;

        let w = &mut self.work;

        zip!(
            w.z_tilde.as_mut(),
            w.rho_inv_vec.as_ref(),
            w.nu.as_ref(),
            w.y.as_ref()
        )
        .for_each(|unzip!(zt, ri, nu, y)| *zt = *ri * (*nu - *y));
        zip!(w.z_tilde.as_mut(), w.z_prev.as_ref()).for_each(|unzip!(zt, zp)| *zt += *zp);

        // Over-relaxed primal update; the increment doubles as the dual
        // infeasibility delta.
        zip!(w.delta_x.as_mut(), w.x_tilde.as_ref(), w.x.as_ref())
            .for_each(|unzip!(dx, xt, x)| *dx = alpha * (*xt - *x));
        zip!(w.x.as_mut(), w.delta_x.as_ref()).for_each(|unzip!(x, dx)| *x += *dx);

        zip!(w.z.as_mut(), w.rho_inv_vec.as_ref(), w.y.as_ref())
            .for_each(|unzip!(z, ri, y)| *z = *ri * *y);
        zip!(w.z.as_mut(), w.z_tilde.as_ref(), w.z_prev.as_ref())
            .for_each(|unzip!(z, zt, zp)| *z += alpha * *zt + (1. - alpha) * *zp);
        vector_ops::clip(&mut w.z, self.prob.l.as_ref(), self.prob.u.as_ref());

        zip!(
            w.delta_y.as_mut(),
            w.z_tilde.as_ref(),
            w.z_prev.as_ref(),
            w.z.as_ref()
        )
        .for_each(|unzip!(dy, zt, zp, z)| *dy = alpha * *zt + (1. - alpha) * *zp - *z);
        zip!(w.delta_y.as_mut(), w.rho_vec.as_ref()).for_each(|unzip!(dy, rho)| *dy *= *rho);
        zip!(w.y.as_mut(), w.delta_y.as_ref()).for_each(|unzip!(y, dy)| *y += *dy);

        Ok(())
    }

    /// Refreshes `A x`, `P x`, `A' y` from the current iterate.
    fn refresh_products(&mut self) {
        sparse_ops::spmv(&mut self.work.ax, 1., self.prob.A.as_ref(), &self.work.x, 0.);
        sparse_ops::sym_spmv_upper(&mut self.work.px, 1., self.prob.P.as_ref(), &self.work.x, 0.);
        sparse_ops::spmv_transpose(&mut self.work.aty, 1., self.prob.A.as_ref(), &self.work.y, 0.);
    }

    /// Residual-balancing step-parameter adaptation.
    fn maybe_adapt_rho(
        &mut self,
        res: &residuals::Residuals,
        iter: usize,
    ) -> Result<(), SolverError> {
        let due = if self.settings.adaptive_rho_interval > 0 {
            iter % self.settings.adaptive_rho_interval == 0
        } else if iter >= self.next_adaptive_check {
            self.next_adaptive_check = self.next_adaptive_check.saturating_mul(2);
            true
        } else {
            false
        };
        if !due {
            return Ok(());
        }

        let prim_norm = E::max(E::max(res.norm_ax_sc, res.norm_z_sc), DIV_TOL);
        let dual_norm = E::max(
            E::max(E::max(res.norm_px_sc, res.norm_aty_sc), res.norm_q_sc),
            DIV_TOL,
        );
        let prim_ratio = res.prim_sc / prim_norm;
        let dual_ratio = E::max(res.dual_sc / dual_norm, DIV_TOL);

        let estimate = (self.rho * (prim_ratio / dual_ratio).sqrt()).clamp(RHO_MIN, RHO_MAX);
        if !estimate.is_finite() {
            return Ok(());
        }
        self.info.rho_estimate = estimate;

        let tol = self.settings.adaptive_rho_tolerance;
        if estimate > self.rho * tol || estimate < self.rho / tol {
            self.apply_rho(estimate)?;
        }
        Ok(())
    }

    fn apply_rho(&mut self, rho_new: E) -> Result<(), SolverError> {
        self.rho = rho_new.clamp(RHO_MIN, RHO_MAX);
        build_rho_vec(
            &self.prob,
            self.rho,
            self.settings.rho_eq_scale,
            &mut self.work.rho_vec,
            &mut self.work.rho_inv_vec,
        );
        self.linsys.update_rho(&self.prob, &self.work.rho_vec)?;
        self.info.rho_updates += 1;
        Ok(())
    }

    /// Records the terminal status, objective, and residuals.
    fn finalize(&mut self, status: Status) {
        self.refresh_products();
        let res =
            residuals::compute_residuals(&self.prob, &self.scaling, &self.work, &self.settings);
        let (prim, dual) = res.checked(self.settings.scaled_termination);
        self.info.prim_res = prim;
        self.info.dual_res = dual;
        self.info.obj_val = self.objective();
        self.info.status = status;

        match status {
            Status::PrimalInfeasible | Status::PrimalInfeasibleInaccurate => {
                self.info.prim_res = E::INFINITY;
                self.info.obj_val = E::NAN;
            }
            Status::DualInfeasible | Status::DualInfeasibleInaccurate => {
                self.info.dual_res = E::INFINITY;
                self.info.obj_val = E::NAN;
            }
            _ => {}
        }
    }

    /// Unscaled objective at the current iterate; requires `px` to be fresh.
    fn objective(&self) -> E {
        let quad = 0.5 * vector_ops::dot(self.work.x.as_ref(), self.work.px.as_ref());
        let lin = vector_ops::dot(self.prob.q.as_ref(), self.work.x.as_ref());
        self.scaling.c_inv * (quad + lin)
    }

    /// Sets the initial iterate for the next solve. Passing a primal vector
    /// also resets `z` to `A x`.
    pub fn warm_start(
        &mut self,
        x: Option<ColRef<'_, E>>,
        y: Option<ColRef<'_, E>>,
    ) -> Result<(), SolverError> {
        let (n, m) = self.prob.get_dims();
        if let Some(x) = x {
            if x.nrows() != n {
                return Err(SolverError::DimensionMismatch {
                    expected: n,
                    actual: x.nrows(),
                });
            }
            if !vector_ops::all_finite(x) {
                return Err(SolverError::InvalidData {
                    reason: "warm-start primal iterate contains non-finite values",
                });
            }
            self.work.x = self.scaling.scale_x(x);
            sparse_ops::spmv(&mut self.work.z, 1., self.prob.A.as_ref(), &self.work.x, 0.);
        }
        if let Some(y) = y {
            if y.nrows() != m {
                return Err(SolverError::DimensionMismatch {
                    expected: m,
                    actual: y.nrows(),
                });
            }
            if !vector_ops::all_finite(y) {
                return Err(SolverError::InvalidData {
                    reason: "warm-start dual iterate contains non-finite values",
                });
            }
            self.work.y = self.scaling.scale_y(y);
        }
        Ok(())
    }

    /// Replaces the linear cost; the sparsity of the problem is untouched.
    pub fn update_lin_cost(&mut self, q_new: ColRef<'_, E>) -> Result<(), SolverError> {
        let n = self.prob.get_n_vars();
        if q_new.nrows() != n {
            return Err(SolverError::DimensionMismatch {
                expected: n,
                actual: q_new.nrows(),
            });
        }
        if !vector_ops::all_finite(q_new) {
            return Err(SolverError::InvalidData {
                reason: "q contains non-finite values",
            });
        }
        for j in 0..n {
            self.prob.q[j] = self.scaling.c * self.scaling.d[j] * q_new[j];
        }
        Ok(())
    }

    /// Replaces one or both bound vectors, revalidating `l <= u` and
    /// refreshing the per-row step parameters when a row changes between
    /// equality, inequality, and free.
    pub fn update_bounds(
        &mut self,
        l_new: Option<ColRef<'_, E>>,
        u_new: Option<ColRef<'_, E>>,
    ) -> Result<(), SolverError> {
        let m = self.prob.get_n_cons();
        for v in [&l_new, &u_new].into_iter().flatten() {
            if v.nrows() != m {
                return Err(SolverError::DimensionMismatch {
                    expected: m,
                    actual: v.nrows(),
                });
            }
        }

        // Candidate bounds in the unscaled space.
        let l_cand = match &l_new {
            Some(l) => l.to_owned(),
            None => self.scaling.unscale_z(self.prob.l.as_ref()),
        };
        let u_cand = match &u_new {
            Some(u) => u.to_owned(),
            None => self.scaling.unscale_z(self.prob.u.as_ref()),
        };
        crate::problem::validate_bounds(l_cand.as_ref(), u_cand.as_ref())?;

        for i in 0..m {
            self.prob.l[i] = self.scaling.e[i] * l_cand[i];
            self.prob.u[i] = self.scaling.e[i] * u_cand[i];
        }

        // Row classes may have flipped; only disturb the backend if they did.
        let old_rho_vec = self.work.rho_vec.to_owned();
        build_rho_vec(
            &self.prob,
            self.rho,
            self.settings.rho_eq_scale,
            &mut self.work.rho_vec,
            &mut self.work.rho_inv_vec,
        );
        if old_rho_vec != self.work.rho_vec {
            self.linsys.update_rho(&self.prob, &self.work.rho_vec)?;
        }
        Ok(())
    }

    /// Sets the step parameter explicitly.
    pub fn update_rho(&mut self, rho_new: E) -> Result<(), SolverError> {
        if !(rho_new > 0. && rho_new.is_finite()) {
            return Err(SolverError::InvalidSettings {
                reason: "rho must be positive and finite",
            });
        }
        self.apply_rho(rho_new)
    }

    /// Replaces the non-structural settings. Structural knobs (`scaling`,
    /// `sigma`, `rho`, `linsys`) are rejected; use a fresh setup or
    /// [`AdmmSolver::update_rho`] instead.
    pub fn update_settings(&mut self, settings: Settings) -> Result<(), SolverError> {
        self.settings.validate_update(&settings)?;
        self.settings = settings;
        Ok(())
    }

    /// Replaces values of `P` (upper triangle, CSC value order), either all
    /// of them or the subset selected by `idx`. The sparsity pattern is
    /// unchanged; the KKT backend is refreshed.
    pub fn update_p_values(
        &mut self,
        vals: &[E],
        idx: Option<&[I]>,
    ) -> Result<(), SolverError> {
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::InvalidData {
                reason: "P contains non-finite values",
            });
        }
        let c = self.scaling.c;
        {
            let pm = self.prob.P.rb_mut();
            let col_ptr = pm.symbolic().col_ptr();
            let row_idx = pm.symbolic().row_idx();
            let values = pm.val_mut();
            write_scaled_values(
                vals,
                idx,
                col_ptr,
                row_idx,
                values,
                |i, j| c * self.scaling.d[i] * self.scaling.d[j],
            )?;
        }
        self.linsys.update_values(&self.prob)
    }

    /// Replaces values of `A` (CSC value order), either all of them or the
    /// subset selected by `idx`. The sparsity pattern is unchanged; the KKT
    /// backend is refreshed.
    pub fn update_a_values(
        &mut self,
        vals: &[E],
        idx: Option<&[I]>,
    ) -> Result<(), SolverError> {
        if vals.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::InvalidData {
                reason: "A contains non-finite values",
            });
        }
        {
            let am = self.prob.A.rb_mut();
            let col_ptr = am.symbolic().col_ptr();
            let row_idx = am.symbolic().row_idx();
            let values = am.val_mut();
            write_scaled_values(
                vals,
                idx,
                col_ptr,
                row_idx,
                values,
                |i, j| self.scaling.e[i] * self.scaling.d[j],
            )?;
        }
        self.linsys.update_values(&self.prob)
    }

    /// Read-only view of the current iterate, unscaled. For infeasible
    /// statuses the corresponding vector carries the certificate instead.
    pub fn solution(&self) -> Solution {
        let (n, m) = self.prob.get_dims();
        let info = self.info.clone();
        match info.status {
            Status::PrimalInfeasible | Status::PrimalInfeasibleInaccurate => Solution {
                x: Col::from_fn(n, |_| E::NAN),
                y: self.scaling.unscale_y(self.work.delta_y.as_ref()),
                info,
            },
            Status::DualInfeasible | Status::DualInfeasibleInaccurate => Solution {
                x: self.scaling.unscale_x(self.work.delta_x.as_ref()),
                y: Col::from_fn(m, |_| E::NAN),
                info,
            },
            _ => Solution {
                x: self.scaling.unscale_x(self.work.x.as_ref()),
                y: self.scaling.unscale_y(self.work.y.as_ref()),
                info,
            },
        }
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    pub fn status(&self) -> Status {
        self.info.status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn get_dims(&self) -> (usize, usize) {
        self.prob.get_dims()
    }
}

/// Per-row step parameters: equality rows are stiffened, free rows relaxed.
fn build_rho_vec(
    prob: &QuadraticProgram,
    rho: E,
    rho_eq_scale: E,
    rho_vec: &mut Col<E>,
    rho_inv_vec: &mut Col<E>,
) {
    for i in 0..prob.get_n_cons() {
        let l = prob.l[i];
        let u = prob.u[i];
        rho_vec[i] = if l == u {
            (rho_eq_scale * rho).clamp(RHO_MIN, RHO_MAX)
        } else if l.is_infinite() && u.is_infinite() {
            RHO_MIN
        } else {
            rho
        };
        rho_inv_vec[i] = 1. / rho_vec[i];
    }
}

/// Scatters externally-supplied matrix values into the scaled storage.
/// `scale(i, j)` gives the scaling factor for an entry at `(i, j)`.
fn write_scaled_values(
    vals: &[E],
    idx: Option<&[I]>,
    col_ptr: &[I],
    row_idx: &[I],
    values: &mut [E],
    scale: impl Fn(usize, usize) -> E,
) -> Result<(), SolverError> {
    let nnz = values.len();
    match idx {
        None => {
            if vals.len() != nnz {
                return Err(SolverError::DimensionMismatch {
                    expected: nnz,
                    actual: vals.len(),
                });
            }
            let ncols = col_ptr.len() - 1;
            for j in 0..ncols {
                for k in col_ptr[j]..col_ptr[j + 1] {
                    values[k] = scale(row_idx[k], j) * vals[k];
                }
            }
        }
        Some(idx) => {
            if vals.len() != idx.len() {
                return Err(SolverError::DimensionMismatch {
                    expected: idx.len(),
                    actual: vals.len(),
                });
            }
            for (v, &k) in vals.iter().zip(idx.iter()) {
                if k >= nnz {
                    return Err(SolverError::InvalidData {
                        reason: "value index out of bounds",
                    });
                }
                let j = col_ptr.partition_point(|&p| p <= k) - 1;
                values[k] = scale(row_idx[k], j) * *v;
            }
        }
    }
    Ok(())
}
