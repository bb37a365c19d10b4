use crate::E;

/// Snapshot handed to callbacks at each termination check.
#[derive(Debug, Clone, Copy)]
pub struct IterationStats {
    pub iteration: usize,
    /// Unscaled primal residual at the check.
    pub prim_res: E,
    /// Unscaled dual residual at the check.
    pub dual_res: E,
    /// Current step parameter.
    pub rho: E,
}

/// Hook invoked at every termination check for logging, monitoring, or
/// early stopping.
pub trait Callback {
    /// Called once before the iteration starts.
    fn init(&mut self) {}

    /// Called with the current residuals at each termination check.
    fn call(&mut self, stats: &IterationStats);
}

/// A callback that does nothing. Use when no per-iteration output is needed.
pub struct NoOpCallback {}

impl Callback for NoOpCallback {
    fn call(&mut self, _stats: &IterationStats) {
        // Do nothing
    }
}

/// Logs primal and dual residuals through the `log` crate each check.
pub struct ConvergenceLog {}

impl Callback for ConvergenceLog {
    fn init(&mut self) {
        log::info!("| {:>6} | {:>10} | {:>10} | {:>9} |", "iter", "prim res", "dual res", "rho");
    }

    fn call(&mut self, stats: &IterationStats) {
        log::info!(
            "| {:6} | {:<10.2e} | {:<10.2e} | {:<9.2e} |",
            stats.iteration,
            stats.prim_res,
            stats.dual_res,
            stats.rho,
        );
    }
}
