//! # boxers
//!
//! An operator-splitting (ADMM) solver for convex quadratic programs of the
//! form
//!
//! ```text
//! min  0.5 x' P x + q' x
//! s.t. l <= A x <= u
//! ```
//!
//! where `P` is sparse symmetric positive semidefinite (stored as its upper
//! triangle) and `A` is a sparse constraint matrix. Bounds may be infinite on
//! either side; rows with `l == u` act as equality constraints.
//!
//! The per-iteration linear system is solved either matrix-free with
//! preconditioned conjugate gradients ([`linsys::PcgKkt`]) or by a direct
//! quasi-definite LDL^T factorization ([`linsys::LdltKkt`]). Problems can be
//! equilibrated (Ruiz scaling), warm started, and optionally polished on the
//! identified active set after convergence.
//!
//! ## Acknowledgment
//!
//! The algorithmic design follows the operator-splitting method described in:
//!
//! > B. Stellato, G. Banjac, P. Goulart, A. Bemporad and S. Boyd, "OSQP: an
//! > operator splitting solver for quadratic programs", *Mathematical
//! > Programming Computation* 12(4), pp. 637-672, 2020.
//!
//! This crate is an independent implementation written from scratch in Rust.

use std::time::Duration;

use faer::Col;
use serde::Serialize;

pub mod callback;
pub mod linalg;
pub mod linsys;
pub mod problem;
pub mod scaling;
pub mod settings;
pub mod solver;
pub mod terminators;

#[cfg(test)]
pub mod tests;

pub use problem::QuadraticProgram;
pub use settings::{KktSolverKind, Settings};
pub use solver::AdmmSolver;

pub type E = f64;
pub type I = usize;

/// Status codes for the solver.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize)]
pub enum Status {
    #[default]
    /// The problem has not been solved yet.
    Unsolved,
    /// An optimal solution was found.
    Solved,
    /// A solution satisfying 10x the requested tolerances was found before
    /// the iteration limit was reached.
    SolvedInaccurate,
    /// The problem is primal infeasible; a certificate is available.
    PrimalInfeasible,
    /// A primal infeasibility certificate satisfying 10x the requested
    /// tolerance was found before the iteration limit was reached.
    PrimalInfeasibleInaccurate,
    /// The problem is dual infeasible (unbounded); a certificate is available.
    DualInfeasible,
    /// A dual infeasibility certificate satisfying 10x the requested
    /// tolerance was found before the iteration limit was reached.
    DualInfeasibleInaccurate,
    /// The solver stopped at the iteration limit.
    MaxIterReached,
    /// The iteration broke down numerically.
    NumericalError,
    /// The solver stopped due to a time limit.
    TimeLimit,
    /// The solver was interrupted (e.g., by user or signal).
    Interrupted,
}

impl Status {
    /// Whether the status corresponds to a usable primal-dual solution.
    pub fn is_solved(&self) -> bool {
        matches!(self, Status::Solved | Status::SolvedInaccurate)
    }

    /// Whether the status carries an infeasibility certificate.
    pub fn is_infeasible(&self) -> bool {
        matches!(
            self,
            Status::PrimalInfeasible
                | Status::PrimalInfeasibleInaccurate
                | Status::DualInfeasible
                | Status::DualInfeasibleInaccurate
        )
    }

    /// Conventional process exit code for hosts that surface one.
    pub fn exit_code(&self) -> i32 {
        match self {
            Status::Solved | Status::SolvedInaccurate => 0,
            Status::Unsolved | Status::MaxIterReached | Status::TimeLimit | Status::Interrupted => {
                1
            }
            Status::PrimalInfeasible | Status::PrimalInfeasibleInaccurate => 2,
            Status::DualInfeasible | Status::DualInfeasibleInaccurate => 3,
            Status::NumericalError => 4,
        }
    }
}

/// Outcome of the active-set polishing step.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize)]
pub enum PolishStatus {
    #[default]
    /// Polishing was disabled or not applicable for the terminal status.
    Skipped,
    /// The polished iterate was committed.
    Successful,
    /// The polished iterate was rejected (or the reduced solve failed); the
    /// ADMM iterate is returned unchanged.
    Unsuccessful,
}

/// Solver diagnostics populated by [`AdmmSolver::solve`].
#[derive(Debug, Clone, Serialize)]
pub struct Info {
    /// Terminal status of the last solve.
    pub status: Status,
    /// Objective value at the returned iterate; NaN when infeasible.
    pub obj_val: E,
    /// Unscaled primal residual `||A x - z||_inf`.
    pub prim_res: E,
    /// Unscaled dual residual `||P x + q + A' y||_inf`.
    pub dual_res: E,
    /// Number of ADMM iterations taken.
    pub iterations: usize,
    /// Number of step-parameter (rho) updates performed.
    pub rho_updates: usize,
    /// Last step-parameter estimate from residual balancing.
    pub rho_estimate: E,
    /// Time spent in setup.
    pub setup_time: Duration,
    /// Time spent in the iteration loop.
    pub solve_time: Duration,
    /// Time spent polishing.
    pub polish_time: Duration,
    /// Outcome of the polishing step.
    pub polish_status: PolishStatus,
}

impl Default for Info {
    fn default() -> Self {
        Self {
            status: Status::Unsolved,
            obj_val: E::NAN,
            prim_res: E::INFINITY,
            dual_res: E::INFINITY,
            iterations: 0,
            rho_updates: 0,
            rho_estimate: 0.,
            setup_time: Duration::ZERO,
            solve_time: Duration::ZERO,
            polish_time: Duration::ZERO,
            polish_status: PolishStatus::Skipped,
        }
    }
}

/// Primal-dual solution returned by [`AdmmSolver::solution`].
///
/// When the status is [`Status::PrimalInfeasible`] the dual vector carries
/// the infeasibility certificate and the primal vector is NaN; for
/// [`Status::DualInfeasible`] the roles are reversed.
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: Col<E>,
    pub y: Col<E>,
    pub info: Info,
}

/// Per-solve hooks for monitoring and early termination.
pub struct SolverHooks {
    pub callback: Box<dyn crate::callback::Callback>,
    pub terminator: Box<dyn crate::terminators::Terminator>,
}

impl SolverHooks {
    pub fn new(
        callback: Box<dyn crate::callback::Callback>,
        terminator: Box<dyn crate::terminators::Terminator>,
    ) -> Self {
        Self {
            callback,
            terminator,
        }
    }
}

impl Default for SolverHooks {
    fn default() -> Self {
        Self {
            callback: Box::new(crate::callback::NoOpCallback {}),
            terminator: Box::new(crate::terminators::MultipleTerminators::new(Vec::new())),
        }
    }
}

/// Errors surfaced by problem construction, setup, and the update API.
#[derive(Debug, derive_more::Display, derive_more::Error, PartialEq)]
pub enum SolverError {
    #[display("Invalid problem data: {reason}")]
    InvalidData { reason: &'static str },

    #[display("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[display("Invalid setting: {reason}")]
    InvalidSettings { reason: &'static str },

    #[display("Structural settings cannot be changed after setup: {name}")]
    StructuralSettingChanged { name: &'static str },

    #[display("KKT factorization failed: {_0}")]
    Factorization(crate::linalg::ldlt::LdltError),

    #[display("Numerical breakdown: {reason}")]
    Numerical { reason: &'static str },
}

impl From<crate::linalg::ldlt::LdltError> for SolverError {
    fn from(err: crate::linalg::ldlt::LdltError) -> Self {
        SolverError::Factorization(err)
    }
}
