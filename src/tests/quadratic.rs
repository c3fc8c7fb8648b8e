use std::cell::Cell;

use float_cmp::assert_approx_eq;

use super::{max_asymmetry, Counted};
use crate::{solnp, BoundsSpec, InequalitySpec, Options, ProgressMonitor};

fn square(x: &[f64]) -> Vec<f64> {
    vec![x[0] * x[0]]
}

#[test]
fn unconstrained_quadratic() -> anyhow::Result<()> {
    let f = Counted::new(square);
    let sol = solnp(
        &f,
        &BoundsSpec::Unbounded(vec![1.0]),
        &InequalitySpec::None,
        None,
        None,
        None,
    )?;

    assert!(sol.converged);
    assert!(sol.optimum[0].abs() < 1e-4, "x* = {}", sol.optimum[0]);
    assert!(sol.value.abs() < 1e-6, "f* = {}", sol.value);
    assert_eq!(sol.multipliers, vec![0.0]);
    assert_eq!(sol.history.len(), sol.iterations + 1);
    assert_eq!(sol.evaluations, f.calls.get());
    assert!(max_asymmetry(&sol.hessian) < 1e-10);
    Ok(())
}

#[test]
fn resolving_from_optimum_stays_put() -> anyhow::Result<()> {
    let first = solnp(
        &square,
        &BoundsSpec::Unbounded(vec![1.0]),
        &InequalitySpec::None,
        None,
        None,
        None,
    )?;
    let second = solnp(
        &square,
        &BoundsSpec::Unbounded(first.optimum.clone()),
        &InequalitySpec::None,
        Some(first.hessian.clone()),
        None,
        None,
    )?;

    // Without constraints the merit is the objective, which never increases.
    assert!(second.converged);
    assert!(second.value <= first.value);
    assert!((second.optimum[0] - first.optimum[0]).abs() <= Options::default().tol);
    assert!(max_asymmetry(&second.hessian) < 1e-10);
    Ok(())
}

struct IterationCounter {
    calls: Cell<usize>,
    last: Cell<usize>,
}

impl ProgressMonitor for IterationCounter {
    fn update(&self, i: usize, _obj: f64, _obj_change: f64, feas_norm: f64, _rho: f64, _mu: f64) {
        assert_eq!(feas_norm, 0.0);
        self.calls.set(self.calls.get() + 1);
        self.last.set(i);
    }
}

#[test]
fn progress_reported_every_major_iteration() -> anyhow::Result<()> {
    let progress = IterationCounter {
        calls: Cell::new(0),
        last: Cell::new(0),
    };
    let sol = solnp(
        &|x: &[f64]| vec![(x[0] - 3.0).powi(2) + 1.0],
        &BoundsSpec::Unbounded(vec![0.5]),
        &InequalitySpec::None,
        None,
        None,
        Some(&progress),
    )?;

    assert!(sol.converged);
    assert_eq!(progress.calls.get(), sol.iterations);
    assert_eq!(progress.last.get(), sol.iterations);
    assert_approx_eq!(f64, sol.value, 1.0, epsilon = 1e-6);
    assert_approx_eq!(f64, sol.optimum[0], 3.0, epsilon = 1e-3);
    Ok(())
}

#[test]
fn no_major_iterations() -> anyhow::Result<()> {
    let f = Counted::new(square);
    let opt = Options {
        max_major_it: 0,
        ..Default::default()
    };
    let sol = solnp(
        &f,
        &BoundsSpec::Unbounded(vec![2.0]),
        &InequalitySpec::None,
        None,
        Some(opt),
        None,
    )?;

    // Nothing has moved, so the convergence test passes trivially.
    assert_eq!(sol.iterations, 0);
    assert_eq!(f.calls.get(), 1);
    assert_eq!(sol.optimum, vec![2.0]);
    assert_eq!(sol.value, 4.0);
    assert_eq!(sol.history, vec![4.0]);
    assert!(sol.converged);
    Ok(())
}
