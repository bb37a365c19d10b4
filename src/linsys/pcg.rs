//! Matrix-free preconditioned conjugate gradients on the reduced KKT system.
//!
//! Eliminating `nu` from the augmented system leaves the SPD system
//!
//! ```text
//! (P + sigma I + A' R A) x_tilde = rhs_x + A' R rhs_z
//! ```
//!
//! which is solved with Jacobi-preconditioned CG using only sparse
//! matrix-vector products with `P` (symmetric upper storage), `A`, and `A'`.
//! The dual block is then recovered as `nu = R A x_tilde - R rhs_z`.

use faer::{Col, unzip, zip};

use crate::linalg::{sparse_ops, vector_ops};
use crate::problem::QuadraticProgram;
use crate::{E, SolverError};

/// Largest admitted relative tolerance for a single CG solve.
const MAX_REDUCTION: E = 0.1;
/// The tolerance schedule never drops below this fraction of the RHS norm.
const MIN_REDUCTION: E = 1e-12;
/// Absolute floor added to the tolerance.
const EPS_ABS: E = 1e-15;
/// Guard for divisions by residual norms.
const DIV_TOL: E = 1e-15;

pub struct PcgKkt {
    sigma: E,
    rho_vec: Col<E>,
    /// Inverse of the Jacobi preconditioner `diag(P + sigma I + A' R A)`.
    precond_inv: Col<E>,
    /// Current relative-tolerance fraction; only ever tightened.
    reduction: E,
    res_hint: Option<(E, E)>,

    /// CG iterate, kept across calls to warm start the next solve.
    x: Col<E>,
    rhs_red: Col<E>,
    r: Col<E>,
    z: Col<E>,
    p_dir: Col<E>,
    kp: Col<E>,
    scratch_m: Col<E>,
}

/// `out <- (P + sigma I + A' R A) v`, using `scratch_m` for the `A v`
/// intermediate.
fn apply_reduced(
    prob: &QuadraticProgram,
    sigma: E,
    rho_vec: &Col<E>,
    scratch_m: &mut Col<E>,
    v: &Col<E>,
    out: &mut Col<E>,
) {
    sparse_ops::sym_spmv_upper(out, 1., prob.P.as_ref(), v, 0.);
    vector_ops::axpy(sigma, v.as_ref(), out);

    sparse_ops::spmv(scratch_m, 1., prob.A.as_ref(), v, 0.);
    zip!(scratch_m.as_mut(), rho_vec.as_ref()).for_each(|unzip!(s, rho)| *s *= *rho);
    sparse_ops::spmv_transpose(out, 1., prob.A.as_ref(), scratch_m, 1.);
}

impl PcgKkt {
    pub fn new(prob: &QuadraticProgram, sigma: E, rho_vec: &Col<E>) -> Self {
        let (n, m) = prob.get_dims();
        let mut out = Self {
            sigma,
            rho_vec: rho_vec.to_owned(),
            precond_inv: Col::zeros(n),
            reduction: MAX_REDUCTION,
            res_hint: None,
            x: Col::zeros(n),
            rhs_red: Col::zeros(n),
            r: Col::zeros(n),
            z: Col::zeros(n),
            p_dir: Col::zeros(n),
            kp: Col::zeros(n),
            scratch_m: Col::zeros(m),
        };
        out.refresh_preconditioner(prob);
        out
    }

    /// Recomputes the Jacobi preconditioner from the current `P`, `A`, and
    /// rho vector. Non-positive diagonal entries fall back to `sigma`.
    fn refresh_preconditioner(&mut self, prob: &QuadraticProgram) {
        let n = prob.get_n_vars();
        let mut diag = Col::<E>::zeros(n);
        sparse_ops::diag_upper(prob.P.as_ref(), &mut diag);

        let mut at_r_a = Col::<E>::zeros(n);
        sparse_ops::atra_diag(prob.A.as_ref(), &self.rho_vec, &mut at_r_a);

        for j in 0..n {
            let mut d = diag[j] + self.sigma + at_r_a[j];
            if !(d > 0.) || !d.is_finite() {
                d = self.sigma;
            }
            self.precond_inv[j] = 1. / d;
        }
    }

    /// Absolute tolerance for this call, tightening the reduction fraction
    /// from the latest outer residuals.
    fn tolerance(&mut self, rhs_norm: E) -> E {
        if let Some((prim, dual)) = self.res_hint.take() {
            let candidate = MAX_REDUCTION * E::max(prim, dual) / E::max(rhs_norm, DIV_TOL);
            self.reduction = E::max(MIN_REDUCTION, E::min(self.reduction, candidate));
        }
        self.reduction * rhs_norm + EPS_ABS
    }
}

impl super::KktSolver for PcgKkt {
    fn solve(
        &mut self,
        prob: &QuadraticProgram,
        rhs_x: &Col<E>,
        rhs_z: &Col<E>,
        x_tilde: &mut Col<E>,
        nu: &mut Col<E>,
    ) -> Result<(), SolverError> {
        let n = prob.get_n_vars();
        let max_iter = usize::max(n, 20);

        // Reduced right-hand side: rhs_x + A' (R rhs_z).
        zip!(self.scratch_m.as_mut(), rhs_z.as_ref(), self.rho_vec.as_ref())
            .for_each(|unzip!(s, rz, rho)| *s = *rz * *rho);
        sparse_ops::spmv_transpose(&mut self.rhs_red, 1., prob.A.as_ref(), &self.scratch_m, 0.);
        vector_ops::axpy(1., rhs_x.as_ref(), &mut self.rhs_red);

        let rhs_norm = vector_ops::norm_2(self.rhs_red.as_ref());
        let tol = self.tolerance(rhs_norm);

        // r = K x - rhs, warm started from the previous solution.
        apply_reduced(
            prob,
            self.sigma,
            &self.rho_vec,
            &mut self.scratch_m,
            &self.x,
            &mut self.r,
        );
        vector_ops::axpy(-1., self.rhs_red.as_ref(), &mut self.r);

        let mut converged = vector_ops::norm_2(self.r.as_ref()) <= tol;
        if !converged {
            zip!(self.z.as_mut(), self.r.as_ref(), self.precond_inv.as_ref())
                .for_each(|unzip!(z, r, m)| *z = *r * *m);
            zip!(self.p_dir.as_mut(), self.z.as_ref()).for_each(|unzip!(p, z)| *p = -*z);
            let mut rz = vector_ops::dot(self.r.as_ref(), self.z.as_ref());

            for _ in 0..max_iter {
                apply_reduced(
                    prob,
                    self.sigma,
                    &self.rho_vec,
                    &mut self.scratch_m,
                    &self.p_dir,
                    &mut self.kp,
                );
                let pkp = vector_ops::dot(self.p_dir.as_ref(), self.kp.as_ref());
                if !(pkp > 0.) || !pkp.is_finite() {
                    return Err(SolverError::Numerical {
                        reason: "reduced KKT system lost positive definiteness",
                    });
                }

                let alpha = rz / pkp;
                vector_ops::axpy(alpha, self.p_dir.as_ref(), &mut self.x);
                vector_ops::axpy(alpha, self.kp.as_ref(), &mut self.r);

                if vector_ops::norm_2(self.r.as_ref()) <= tol {
                    converged = true;
                    break;
                }

                zip!(self.z.as_mut(), self.r.as_ref(), self.precond_inv.as_ref())
                    .for_each(|unzip!(z, r, m)| *z = *r * *m);
                let rz_next = vector_ops::dot(self.r.as_ref(), self.z.as_ref());
                let beta = rz_next / rz;
                rz = rz_next;
                zip!(self.p_dir.as_mut(), self.z.as_ref())
                    .for_each(|unzip!(p, z)| *p = beta * *p - *z);
            }
        }
        if !converged {
            return Err(SolverError::Numerical {
                reason: "conjugate gradient hit its iteration cap",
            });
        }

        vector_ops::copy_to(self.x.as_ref(), x_tilde);

        // nu = R A x_tilde - R rhs_z.
        sparse_ops::spmv(&mut self.scratch_m, 1., prob.A.as_ref(), &self.x, 0.);
        zip!(
            nu.as_mut(),
            self.scratch_m.as_ref(),
            rhs_z.as_ref(),
            self.rho_vec.as_ref()
        )
        .for_each(|unzip!(nu, ax, rz, rho)| *nu = *rho * (*ax - *rz));

        Ok(())
    }

    fn update_rho(
        &mut self,
        prob: &QuadraticProgram,
        rho_vec: &Col<E>,
    ) -> Result<(), SolverError> {
        vector_ops::copy_to(rho_vec.as_ref(), &mut self.rho_vec);
        self.refresh_preconditioner(prob);
        Ok(())
    }

    fn update_values(&mut self, prob: &QuadraticProgram) -> Result<(), SolverError> {
        self.refresh_preconditioner(prob);
        Ok(())
    }

    fn set_residual_hint(&mut self, prim_res: E, dual_res: E) {
        self.res_hint = Some((prim_res, dual_res));
    }

    fn is_direct(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse_ops::from_triplets;
    use crate::linsys::KktSolver;

    fn sample_problem() -> QuadraticProgram {
        let p = from_triplets(3, 3, &[(0, 0, 4.), (0, 1, 1.), (1, 1, 2.), (2, 2, 1.)]).unwrap();
        let a = from_triplets(2, 3, &[(0, 0, 1.), (0, 1, 1.), (1, 2, 1.)]).unwrap();
        QuadraticProgram::new(
            p,
            Col::from_fn(3, |i| [-1., 0., 1.][i]),
            a,
            Col::from_fn(2, |_| -1.),
            Col::from_fn(2, |_| 1.),
        )
        .unwrap()
    }

    #[test]
    fn solves_reduced_system_to_tolerance() {
        let prob = sample_problem();
        let sigma = 1e-6;
        let rho = Col::from_fn(2, |_| 0.1);
        let mut pcg = PcgKkt::new(&prob, sigma, &rho);

        let rhs_x = Col::from_fn(3, |i| [1., -2., 0.5][i]);
        let rhs_z = Col::from_fn(2, |i| [0.3, -0.7][i]);
        let mut x_tilde = Col::zeros(3);
        let mut nu = Col::zeros(2);
        pcg.solve(&prob, &rhs_x, &rhs_z, &mut x_tilde, &mut nu)
            .unwrap();

        // Verify (P + sigma I + A' R A) x = rhs_x + A' R rhs_z directly.
        let mut kx = Col::<E>::zeros(3);
        let mut scratch = Col::<E>::zeros(2);
        apply_reduced(&prob, sigma, &rho, &mut scratch, &x_tilde, &mut kx);

        let mut rhs = Col::<E>::zeros(3);
        let mut rz = rhs_z.to_owned();
        for i in 0..2 {
            rz[i] *= rho[i];
        }
        sparse_ops::spmv_transpose(&mut rhs, 1., prob.A.as_ref(), &rz, 0.);
        vector_ops::axpy(1., rhs_x.as_ref(), &mut rhs);

        for j in 0..3 {
            assert!((kx[j] - rhs[j]).abs() < 1e-6, "row {j}");
        }

        // nu must satisfy the second block row: A x - R^-1 nu = rhs_z.
        let mut ax = Col::<E>::zeros(2);
        sparse_ops::spmv(&mut ax, 1., prob.A.as_ref(), &x_tilde, 0.);
        for i in 0..2 {
            let r = ax[i] - nu[i] / rho[i] - rhs_z[i];
            assert!(r.abs() < 1e-5, "dual row {i} residual {r}");
        }
    }

    #[test]
    fn warm_start_converges_immediately_on_repeat() {
        let prob = sample_problem();
        let rho = Col::from_fn(2, |_| 0.1);
        let mut pcg = PcgKkt::new(&prob, 1e-6, &rho);

        let rhs_x = Col::from_fn(3, |i| [1., 1., 1.][i]);
        let rhs_z = Col::zeros(2);
        let mut x1 = Col::zeros(3);
        let mut nu = Col::zeros(2);
        pcg.solve(&prob, &rhs_x, &rhs_z, &mut x1, &mut nu).unwrap();
        let mut x2 = Col::zeros(3);
        pcg.solve(&prob, &rhs_x, &rhs_z, &mut x2, &mut nu).unwrap();
        for j in 0..3 {
            assert!((x1[j] - x2[j]).abs() < 1e-9);
        }
    }

    #[test]
    fn preconditioner_guards_empty_diagonal() {
        // Zero P and no constraints: every diagonal entry degenerates to
        // sigma.
        let p = from_triplets(2, 2, &[]).unwrap();
        let a = from_triplets(0, 2, &[]).unwrap();
        let prob =
            QuadraticProgram::new(p, Col::zeros(2), a, Col::zeros(0), Col::zeros(0)).unwrap();
        let rho = Col::zeros(0);
        let pcg = PcgKkt::new(&prob, 1e-6, &rho);
        for j in 0..2 {
            assert!((pcg.precond_inv[j] - 1e6).abs() < 1e-3);
        }
    }
}
