//! Per-iteration KKT backends.
//!
//! Each ADMM step needs `x_tilde`, `nu` satisfying
//!
//! ```text
//! [ P + sigma I    A'     ] [ x_tilde ]   [ sigma x - q    ]
//! [ A             -R^-1   ] [ nu      ] = [ z - R^-1 y     ]
//! ```
//!
//! with `R = diag(rho_vec)`. Backends receive the two right-hand side blocks
//! and produce `x_tilde` and `nu`; the engine reconstructs
//! `z_tilde = z + R^-1 (nu - y)`.

use enum_dispatch::enum_dispatch;
use faer::Col;

use crate::problem::QuadraticProgram;
use crate::settings::KktSolverKind;
use crate::{E, SolverError};

pub mod direct;
pub mod pcg;

pub use direct::LdltKkt;
pub use pcg::PcgKkt;

/// Interface implemented by the per-iteration linear-system backends.
#[enum_dispatch]
pub trait KktSolver {
    /// Solves the KKT system for the given right-hand side blocks.
    fn solve(
        &mut self,
        prob: &QuadraticProgram,
        rhs_x: &Col<E>,
        rhs_z: &Col<E>,
        x_tilde: &mut Col<E>,
        nu: &mut Col<E>,
    ) -> Result<(), SolverError>;

    /// Installs a new step-parameter vector.
    fn update_rho(&mut self, prob: &QuadraticProgram, rho_vec: &Col<E>)
    -> Result<(), SolverError>;

    /// Refreshes internal state after the numeric values of `P` or `A`
    /// changed (sparsity is unchanged).
    fn update_values(&mut self, prob: &QuadraticProgram) -> Result<(), SolverError>;

    /// Passes the latest scaled residuals, used by iterative backends to
    /// tighten their termination tolerance as the outer iteration converges.
    fn set_residual_hint(&mut self, prim_res: E, dual_res: E);

    /// Whether the backend factors the KKT matrix exactly.
    fn is_direct(&self) -> bool;
}

/// The compiled-in backends, dispatched by [`KktSolverKind`].
#[enum_dispatch(KktSolver)]
pub enum KktBackend {
    Pcg(PcgKkt),
    Ldlt(LdltKkt),
}

impl KktBackend {
    pub fn new(
        kind: KktSolverKind,
        prob: &QuadraticProgram,
        sigma: E,
        rho_vec: &Col<E>,
    ) -> Result<Self, SolverError> {
        Ok(match kind {
            KktSolverKind::Pcg => Self::Pcg(PcgKkt::new(prob, sigma, rho_vec)),
            KktSolverKind::Ldlt => Self::Ldlt(LdltKkt::new(prob, sigma, rho_vec)?),
        })
    }
}
