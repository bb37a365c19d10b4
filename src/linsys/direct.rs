//! Direct backend: LDL^T factorization of the quasi-definite KKT matrix.
//!
//! Assembles the upper triangle of the `(n + m) x (n + m)` system
//!
//! ```text
//! [ P + sigma I    A'     ]
//! [ A             -R^-1   ]
//! ```
//!
//! once at construction and tracks the value slots that change on rho or
//! matrix updates, so those only rewrite values and refactorize.

use faer::prelude::ReborrowMut;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use faer::{Col, Mat};

use crate::linalg::ldlt::SimplicialLdlt;
use crate::problem::QuadraticProgram;
use crate::{E, I, SolverError};

pub struct LdltKkt {
    sigma: E,
    n: usize,
    m: usize,
    kkt: SparseColMat<I, E>,
    solver: SimplicialLdlt,
    /// Value slot of each `-1/rho_i` diagonal entry.
    rho_diag_idx: Vec<I>,
    /// Value slot of each `P` entry, in `P`'s CSC value order.
    p_val_idx: Vec<I>,
    /// Value slot of each `sigma + P_jj` diagonal entry of the first block.
    sigma_diag_idx: Vec<I>,
    /// Value slot of each `A` entry, in row-major value order.
    a_val_idx: Vec<I>,
    rhs: Mat<E>,
}

impl LdltKkt {
    pub fn new(
        prob: &QuadraticProgram,
        sigma: E,
        rho_vec: &Col<E>,
    ) -> Result<Self, SolverError> {
        let (n, m) = prob.get_dims();
        let a_nnz = prob.A.compute_nnz();
        let p_nnz = prob.P.compute_nnz();
        let n_values = n + m + p_nnz + a_nnz;

        let mut col_ptrs = Vec::with_capacity(n + m + 1);
        let mut row_indices = Vec::with_capacity(n_values);
        let mut values = Vec::with_capacity(n_values);

        let p_col_ptr = prob.P.symbolic().col_ptr();
        let p_row_idx = prob.P.symbolic().row_idx();
        let p_values = prob.P.val();

        // First block columns: strict upper part of P, then a guaranteed
        // diagonal slot carrying sigma + P_jj.
        let mut p_val_idx = vec![0usize; p_nnz];
        let mut sigma_diag_idx = Vec::with_capacity(n);
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
                    p_val_idx[k] = values.len() - 1;
                }
            }
            row_indices.push(j);
            values.push(sigma + diag);
            sigma_diag_idx.push(values.len() - 1);
            // The diagonal slot doubles as the target of P's diagonal value.
            for k in p_col_ptr[j]..p_col_ptr[j + 1] {
                if p_row_idx[k] == j {
                    p_val_idx[k] = values.len() - 1;
                }
            }
            col_ptrs.push(row_indices.len());
        }

        // Second block columns: A' from the row-major form of A, then the
        // -1/rho diagonal.
        let a_csr = prob
            .A
            .to_row_major()
            .map_err(|_| SolverError::Numerical {
                reason: "constraint matrix transpose failed",
            })?;
        let a_row_ptr = a_csr.symbolic().row_ptr();
        let a_col_idx = a_csr.symbolic().col_idx();
        let a_values = a_csr.val();

        let mut a_val_idx = vec![0usize; a_nnz];
        let mut rho_diag_idx = Vec::with_capacity(m);
        for i in 0..m {
            for k in a_row_ptr[i]..a_row_ptr[i + 1] {
                row_indices.push(a_col_idx[k]);
                values.push(a_values[k]);
                a_val_idx[k] = values.len() - 1;
            }
            row_indices.push(n + i);
            values.push(-1. / rho_vec[i]);
            rho_diag_idx.push(values.len() - 1);
            col_ptrs.push(row_indices.len());
        }

        let kkt = unsafe {
            let sym = SymbolicSparseColMat::new_unchecked(
                n + m,
                n + m,
                col_ptrs,
                None,
                row_indices,
            );
            SparseColMat::<I, E>::new(sym, values)
        };

        let solver = SimplicialLdlt::try_new(kkt.as_ref())?;

        Ok(Self {
            sigma,
            n,
            m,
            kkt,
            solver,
            rho_diag_idx,
            p_val_idx,
            sigma_diag_idx,
            a_val_idx,
            rhs: Mat::zeros(n + m, 1),
        })
    }
}

impl super::KktSolver for LdltKkt {
    fn solve(
        &mut self,
        _prob: &QuadraticProgram,
        rhs_x: &Col<E>,
        rhs_z: &Col<E>,
        x_tilde: &mut Col<E>,
        nu: &mut Col<E>,
    ) -> Result<(), SolverError> {
        for j in 0..self.n {
            self.rhs[(j, 0)] = rhs_x[j];
        }
        for i in 0..self.m {
            self.rhs[(self.n + i, 0)] = rhs_z[i];
        }

        self.solver.solve_in_place(self.rhs.as_mut())?;

        for j in 0..self.n {
            x_tilde[j] = self.rhs[(j, 0)];
        }
        for i in 0..self.m {
            nu[i] = self.rhs[(self.n + i, 0)];
        }
        Ok(())
    }

    fn update_rho(
        &mut self,
        _prob: &QuadraticProgram,
        rho_vec: &Col<E>,
    ) -> Result<(), SolverError> {
        {
            let kkt = self.kkt.rb_mut();
            let values = kkt.val_mut();
            for i in 0..self.m {
                values[self.rho_diag_idx[i]] = -1. / rho_vec[i];
            }
        }
        self.solver.refactorize(self.kkt.as_ref())?;
        Ok(())
    }

    fn update_values(&mut self, prob: &QuadraticProgram) -> Result<(), SolverError> {
        let a_csr = prob
            .A
            .to_row_major()
            .map_err(|_| SolverError::Numerical {
                reason: "constraint matrix transpose failed",
            })?;
        {
            let p_values = prob.P.val();
            let a_values = a_csr.val();
            let kkt = self.kkt.rb_mut();
            let values = kkt.val_mut();

            // Reset the diagonal slots, then scatter P and A values; P's
            // diagonal adds onto sigma.
            for j in 0..self.n {
                values[self.sigma_diag_idx[j]] = self.sigma;
            }
            let p_col_ptr = prob.P.symbolic().col_ptr();
            let p_row_idx = prob.P.symbolic().row_idx();
            for j in 0..self.n {
                for k in p_col_ptr[j]..p_col_ptr[j + 1] {
                    if p_row_idx[k] == j {
                        values[self.p_val_idx[k]] += p_values[k];
                    } else {
                        values[self.p_val_idx[k]] = p_values[k];
                    }
                }
            }
            for (k, idx) in self.a_val_idx.iter().enumerate() {
                values[*idx] = a_values[k];
            }
        }
        self.solver.refactorize(self.kkt.as_ref())?;
        Ok(())
    }

    fn set_residual_hint(&mut self, _prim_res: E, _dual_res: E) {
        // Exact solves do not use a tolerance schedule.
    }

    fn is_direct(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{sparse_ops, vector_ops};
    use crate::linalg::sparse_ops::from_triplets;
    use crate::linsys::{KktSolver, PcgKkt};

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

    fn check_kkt_residual(
        prob: &QuadraticProgram,
        sigma: E,
        rho: &Col<E>,
        rhs_x: &Col<E>,
        rhs_z: &Col<E>,
        x_tilde: &Col<E>,
        nu: &Col<E>,
    ) {
        // (P + sigma I) x + A' nu = rhs_x
        let mut top = Col::<E>::zeros(prob.get_n_vars());
        sparse_ops::sym_spmv_upper(&mut top, 1., prob.P.as_ref(), x_tilde, 0.);
        vector_ops::axpy(sigma, x_tilde.as_ref(), &mut top);
        sparse_ops::spmv_transpose(&mut top, 1., prob.A.as_ref(), nu, 1.);
        for j in 0..prob.get_n_vars() {
            assert!((top[j] - rhs_x[j]).abs() < 1e-9, "primal row {j}");
        }
        // A x - R^-1 nu = rhs_z
        let mut bot = Col::<E>::zeros(prob.get_n_cons());
        sparse_ops::spmv(&mut bot, 1., prob.A.as_ref(), x_tilde, 0.);
        for i in 0..prob.get_n_cons() {
            assert!(
                (bot[i] - nu[i] / rho[i] - rhs_z[i]).abs() < 1e-9,
                "dual row {i}"
            );
        }
    }

    #[test]
    fn solves_augmented_system() {
        let prob = sample_problem();
        let sigma = 1e-6;
        let rho = Col::from_fn(2, |i| [0.1, 2.0][i]);
        let mut kkt = LdltKkt::new(&prob, sigma, &rho).unwrap();

        let rhs_x = Col::from_fn(3, |i| [1., -2., 0.5][i]);
        let rhs_z = Col::from_fn(2, |i| [0.3, -0.7][i]);
        let mut x_tilde = Col::zeros(3);
        let mut nu = Col::zeros(2);
        kkt.solve(&prob, &rhs_x, &rhs_z, &mut x_tilde, &mut nu)
            .unwrap();

        check_kkt_residual(&prob, sigma, &rho, &rhs_x, &rhs_z, &x_tilde, &nu);
    }

    #[test]
    fn rho_update_changes_solution_consistently() {
        let prob = sample_problem();
        let sigma = 1e-6;
        let rho = Col::from_fn(2, |_| 0.1);
        let mut kkt = LdltKkt::new(&prob, sigma, &rho).unwrap();

        let rho2 = Col::from_fn(2, |_| 5.0);
        kkt.update_rho(&prob, &rho2).unwrap();

        let rhs_x = Col::from_fn(3, |_| 1.);
        let rhs_z = Col::from_fn(2, |_| 0.5);
        let mut x_tilde = Col::zeros(3);
        let mut nu = Col::zeros(2);
        kkt.solve(&prob, &rhs_x, &rhs_z, &mut x_tilde, &mut nu)
            .unwrap();

        check_kkt_residual(&prob, sigma, &rho2, &rhs_x, &rhs_z, &x_tilde, &nu);
    }

    #[test]
    fn agrees_with_pcg_backend() {
        let prob = sample_problem();
        let sigma = 1e-6;
        let rho = Col::from_fn(2, |i| [0.4, 1.5][i]);
        let mut direct = LdltKkt::new(&prob, sigma, &rho).unwrap();
        let mut pcg = PcgKkt::new(&prob, sigma, &rho);

        let rhs_x = Col::from_fn(3, |i| [0.2, -1., 3.][i]);
        let rhs_z = Col::from_fn(2, |i| [1., -1.][i]);

        let mut x_d = Col::zeros(3);
        let mut nu_d = Col::zeros(2);
        direct
            .solve(&prob, &rhs_x, &rhs_z, &mut x_d, &mut nu_d)
            .unwrap();

        let mut x_i = Col::zeros(3);
        let mut nu_i = Col::zeros(2);
        pcg.solve(&prob, &rhs_x, &rhs_z, &mut x_i, &mut nu_i)
            .unwrap();

        for j in 0..3 {
            assert!((x_d[j] - x_i[j]).abs() < 1e-5, "x mismatch at {j}");
        }
        for i in 0..2 {
            assert!((nu_d[i] - nu_i[i]).abs() < 1e-4, "nu mismatch at {i}");
        }
    }

    #[test]
    fn handles_unconstrained_problems() {
        let p = from_triplets(2, 2, &[(0, 0, 2.), (1, 1, 2.)]).unwrap();
        let a = from_triplets(0, 2, &[]).unwrap();
        let prob =
            QuadraticProgram::new(p, Col::zeros(2), a, Col::zeros(0), Col::zeros(0)).unwrap();
        let rho = Col::zeros(0);
        let mut kkt = LdltKkt::new(&prob, 1e-6, &rho).unwrap();

        let rhs_x = Col::from_fn(2, |_| 2.);
        let rhs_z = Col::zeros(0);
        let mut x_tilde = Col::zeros(2);
        let mut nu = Col::zeros(0);
        kkt.solve(&prob, &rhs_x, &rhs_z, &mut x_tilde, &mut nu)
            .unwrap();
        for j in 0..2 {
            assert!((x_tilde[j] - 2. / (2. + 1e-6)).abs() < 1e-9);
        }
    }
}
