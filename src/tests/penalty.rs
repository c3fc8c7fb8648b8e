use std::cell::RefCell;

use float_cmp::assert_approx_eq;
use nalgebra::DMatrix;

use crate::math::norm;
use crate::{solnp, BoundsSpec, InequalitySpec, Options, ProgressMonitor};

#[derive(Clone, Copy, Debug)]
struct Step {
    feas: f64,
    rho: f64,
    mu: f64,
}

#[derive(Default)]
struct Recorder {
    steps: RefCell<Vec<Step>>,
}

impl ProgressMonitor for Recorder {
    fn update(&self, _i: usize, _obj: f64, _obj_change: f64, feas_norm: f64, rho: f64, mu: f64) {
        self.steps.borrow_mut().push(Step {
            feas: feas_norm,
            rho,
            mu,
        });
    }
}

/// Penalty coefficient after a major iteration that moved the constraint
/// norm from `prev` to `feas`.
fn next_rho(prev: f64, rho: f64, feas: f64, tol: f64) -> f64 {
    let mut rho = if feas < 10.0 * tol { 0.0 } else { rho };
    if feas < 5.0 * prev {
        rho /= 5.0;
    } else if feas > 10.0 * prev {
        rho = 5.0 * rho.max(tol.sqrt());
    }
    rho
}

fn powell(x: &[f64]) -> Vec<f64> {
    vec![
        x.iter().product::<f64>().exp(),
        x.iter().map(|v| v * v).sum::<f64>() - 10.0,
        x[1] * x[2] - 5.0 * x[3] * x[4],
        x[0].powi(3) + x[1].powi(3) + 1.0,
    ]
}

#[test]
fn penalty_follows_feasibility_trend() -> anyhow::Result<()> {
    let x0 = vec![-2.0, 2.0, 2.0, -1.0, -1.0];
    let recorder = Recorder::default();
    let sol = solnp(
        &powell,
        &BoundsSpec::Unbounded(x0.clone()),
        &InequalitySpec::None,
        None,
        None,
        Some(&recorder),
    )?;
    assert!(sol.converged);

    let tol = Options::default().tol;
    let start = Step {
        feas: norm(&powell(&x0)[1..]),
        rho: Options::default().rho,
        mu: x0.len() as f64,
    };
    let steps = recorder.steps.borrow();
    assert_eq!(steps.len(), sol.iterations);

    let mut shrunk = 0;
    let mut dropped = 0;
    let mut prev = start;
    for step in steps.iter() {
        assert_eq!(step.rho, next_rho(prev.feas, prev.rho, step.feas, tol), "{:?}", step);
        if step.feas < 10.0 * tol {
            assert_eq!(step.rho, 0.0);
            assert!(step.mu <= tol, "{:?}", step);
            dropped += 1;
        } else if step.feas < 5.0 * prev.feas && prev.rho > 0.0 {
            assert_approx_eq!(f64, step.rho, prev.rho / 5.0);
            shrunk += 1;
        }
        prev = *step;
    }
    assert!(shrunk > 0);
    assert!(dropped > 0);
    Ok(())
}

#[test]
fn penalty_grows_when_feasibility_is_lost() -> anyhow::Result<()> {
    // Starting on the circle: the first step follows the tangent towards
    // (2, 1) and leaves the constraint well behind.
    let recorder = Recorder::default();
    let opt = Options {
        max_major_it: 1,
        ..Default::default()
    };
    let tol = opt.tol;
    solnp(
        &|x: &[f64]| {
            vec![
                (x[0] - 2.0).powi(2) + (x[1] - 1.0).powi(2),
                x[0] * x[0] + x[1] * x[1] - 1.0,
            ]
        },
        &BoundsSpec::Unbounded(vec![0.6, 0.8]),
        &InequalitySpec::None,
        None,
        Some(opt),
        Some(&recorder),
    )?;

    let steps = recorder.steps.borrow();
    assert_eq!(steps.len(), 1);
    assert!(steps[0].feas >= 10.0 * tol, "{:?}", steps[0]);
    // A feasible start begins without penalty.
    assert_approx_eq!(f64, steps[0].rho, 5.0 * tol.sqrt(), epsilon = 1e-15);
    Ok(())
}

#[test]
fn stuck_iteration_resets_multipliers_and_curvature() -> anyhow::Result<()> {
    // Projecting onto the linearization of cbrt(x) = 0 overshoots from
    // x = 1 to x = -2: the objective rises and the violation grows.
    let opt = Options {
        max_major_it: 1,
        ..Default::default()
    };
    let hessian = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
    let sol = solnp(
        &|x: &[f64]| vec![x[0] * x[0] + (x[1] - 1.0).powi(2), x[0].cbrt()],
        &BoundsSpec::Unbounded(vec![1.0, 1.0]),
        &InequalitySpec::None,
        Some(hessian),
        Some(opt),
        None,
    )?;

    assert_eq!(sol.iterations, 1);
    assert!(!sol.converged);
    assert!(sol.history[1] > sol.history[0], "{:?}", sol.history);
    assert_approx_eq!(f64, sol.optimum[0], -2.0, epsilon = 1e-3);

    assert_eq!(sol.multipliers, vec![0.0]);
    assert_eq!(sol.hessian[(0, 1)], 0.0);
    assert_eq!(sol.hessian[(1, 0)], 0.0);
    assert!(sol.hessian[(0, 0)] > 0.0 && sol.hessian[(1, 1)] > 0.0);
    Ok(())
}
