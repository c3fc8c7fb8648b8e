/// Objective and constraint function of a nonlinear program.
///
/// Maps the decision variables to `[objective, equality residuals...,
/// inequality values...]`. The layout must be the same on every call and
/// the function must be deterministic.
pub trait ObjectiveFunction {
    fn f(&self, x: &[f64]) -> Vec<f64>;
}

impl<F> ObjectiveFunction for F
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    fn f(&self, x: &[f64]) -> Vec<f64> {
        self(x)
    }
}

/// Called after each major iteration of the solver with the iteration
/// number, objective value, relative objective change, constraint norm,
/// penalty coefficient and damping parameter.
pub trait ProgressMonitor {
    fn update(
        &self,
        i: usize,
        obj: f64,
        obj_change: f64,
        feas_norm: f64,
        rho: f64,
        mu: f64,
    );
}
