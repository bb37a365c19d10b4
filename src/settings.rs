//! Solver configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{E, SolverError};

/// Selection of the per-iteration KKT backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KktSolverKind {
    /// Matrix-free preconditioned conjugate gradients on the reduced system.
    #[default]
    Pcg,
    /// Direct LDL^T factorization of the quasi-definite KKT matrix.
    Ldlt,
}

/// Solver configuration parameters.
///
/// `Settings::default()` gives a configuration suitable for control-style
/// workloads at moderate accuracy. All values are checked by [`Settings::validate`],
/// which [`crate::AdmmSolver::setup`] calls before any allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Initial step parameter (rho). Must be positive; clamped into
    /// `[1e-6, 1e6]` internally.
    pub rho: E,

    /// Primal regularization added to `P` in the KKT system. Must be positive.
    pub sigma: E,

    /// Maximum ADMM iterations. At least 1.
    pub max_iter: usize,

    /// Absolute termination tolerance.
    pub eps_abs: E,

    /// Relative termination tolerance. Together with `eps_abs`, at least one
    /// must be positive.
    pub eps_rel: E,

    /// Tolerance for the primal infeasibility certificate.
    pub eps_prim_inf: E,

    /// Tolerance for the dual infeasibility certificate.
    pub eps_dual_inf: E,

    /// Over-relaxation parameter, in the open interval (0, 2).
    pub alpha: E,

    /// Number of Ruiz equilibration passes; 0 disables scaling.
    pub scaling: usize,

    /// Adapt rho from the primal/dual residual balance.
    pub adaptive_rho: bool,

    /// Fixed iteration interval between rho adaptations; 0 selects the
    /// built-in doubling schedule (25, 50, 100, ...).
    pub adaptive_rho_interval: usize,

    /// Adaptation deadband: rho is only changed when the new estimate differs
    /// from the current value by more than this factor. At least 1.
    pub adaptive_rho_tolerance: E,

    /// Multiplier applied to rho on rows with `l == u`. At least 1.
    pub rho_eq_scale: E,

    /// Continue from the current iterate instead of cold-starting each solve.
    pub warm_start: bool,

    /// Refine the solution on the identified active set after convergence.
    pub polishing: bool,

    /// Regularization used in the polish KKT system. Must be positive.
    pub delta: E,

    /// Iterative refinement steps in the polish solve.
    pub polish_refine_iter: usize,

    /// Emit per-check progress through the `log` crate.
    pub verbose: bool,

    /// Termination is checked every this many iterations; 0 checks every
    /// iteration.
    pub check_termination: usize,

    /// Evaluate the termination criteria on the scaled problem instead of
    /// unscaling the residuals first.
    pub scaled_termination: bool,

    /// Wall-clock budget for a single solve; `None` disables the limit.
    pub time_limit: Option<Duration>,

    /// KKT backend used for the per-iteration subproblem.
    pub linsys: KktSolverKind,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            rho: 0.1,
            sigma: 1e-6,
            max_iter: 4000,
            eps_abs: 1e-3,
            eps_rel: 1e-3,
            eps_prim_inf: 1e-4,
            eps_dual_inf: 1e-4,
            alpha: 1.6,
            scaling: 10,
            adaptive_rho: true,
            adaptive_rho_interval: 0,
            adaptive_rho_tolerance: 5.,
            rho_eq_scale: 1e3,
            warm_start: true,
            polishing: false,
            delta: 1e-6,
            polish_refine_iter: 3,
            verbose: false,
            check_termination: 25,
            scaled_termination: false,
            time_limit: None,
            linsys: KktSolverKind::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks every parameter against its admitted range.
    pub fn validate(&self) -> Result<(), SolverError> {
        let invalid = |reason| Err(SolverError::InvalidSettings { reason });

        if !(self.rho > 0. && self.rho.is_finite()) {
            return invalid("rho must be positive and finite");
        }
        if !(self.sigma > 0. && self.sigma.is_finite()) {
            return invalid("sigma must be positive and finite");
        }
        if self.max_iter == 0 {
            return invalid("max_iter must be at least 1");
        }
        if !(self.eps_abs >= 0.) || !(self.eps_rel >= 0.) {
            return invalid("eps_abs and eps_rel must be non-negative");
        }
        if self.eps_abs == 0. && self.eps_rel == 0. {
            return invalid("at least one of eps_abs and eps_rel must be positive");
        }
        if !(self.eps_prim_inf > 0.) || !(self.eps_dual_inf > 0.) {
            return invalid("infeasibility tolerances must be positive");
        }
        if !(self.alpha > 0. && self.alpha < 2.) {
            return invalid("alpha must lie in (0, 2)");
        }
        if !(self.adaptive_rho_tolerance >= 1.) {
            return invalid("adaptive_rho_tolerance must be at least 1");
        }
        if !(self.rho_eq_scale >= 1.) {
            return invalid("rho_eq_scale must be at least 1");
        }
        if !(self.delta > 0. && self.delta.is_finite()) {
            return invalid("delta must be positive and finite");
        }
        Ok(())
    }

    /// Checks that `new` only differs from `self` in knobs that can be
    /// changed after setup. Structural parameters (those baked into the
    /// scaling or the KKT symbolic factorization) must go through a fresh
    /// [`crate::AdmmSolver::setup`].
    pub(crate) fn validate_update(&self, new: &Settings) -> Result<(), SolverError> {
        new.validate()?;
        if new.scaling != self.scaling {
            return Err(SolverError::StructuralSettingChanged { name: "scaling" });
        }
        if new.linsys != self.linsys {
            return Err(SolverError::StructuralSettingChanged { name: "linsys" });
        }
        if new.sigma != self.sigma {
            return Err(SolverError::StructuralSettingChanged { name: "sigma" });
        }
        if new.rho != self.rho {
            return Err(SolverError::StructuralSettingChanged { name: "rho" });
        }
        Ok(())
    }
}
