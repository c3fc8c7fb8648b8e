use crate::common::{BoundsSpec, InequalitySpec, Options, Solution};
use crate::error::{Result, SolnpError};
use crate::math::norm;
use crate::problem::{Dimensions, Evaluator, Problem};
use crate::subnp::{Subnp, SubnpState};
use crate::traits::{ObjectiveFunction, ProgressMonitor};
use log::{debug, info};
use nalgebra::{DMatrix, DVector};

/// Augmented Lagrangian SQP solver for nonlinear programming.
/// Minimize a function F(x) beginning from a starting point x0, subject
/// to optional nonlinear constraints and variable bounds.
///
/// ```txt
///       min F(x)
///        x
/// ```
///
/// subject to
///
/// ```txt
///       g(x) = 0            (nonlinear equalities)
///       l <= h(x) <= u      (nonlinear inequalities)
///       xmin <= x <= xmax   (variable bounds)
/// ```
///
/// `f_fn` returns `[F(x), g(x)..., h(x)...]`; the number of equality
/// constraints is whatever is left after the objective and the inequalities
/// declared by `inequalities`. Gradients are estimated by forward
/// differences. Inequalities are turned into equalities on bounded slack
/// variables, which are carried ahead of `x` in the curvature matrix, so
/// `hessian` (identity by default) must be square with one row per
/// inequality plus one per parameter.
///
/// Every major iteration solves an augmented Lagrangian subproblem, then
/// adapts the penalty coefficient from the trend in constraint violation.
/// The solve stops when both the relative change in the objective and the
/// constraint norm fall below `opt.tol`, or after `opt.max_major_it`
/// iterations. Exhausting the iterations is not an error: the returned
/// solution then has `converged == false`.
pub fn solnp(
    f_fn: &dyn ObjectiveFunction,
    parameters: &BoundsSpec,
    inequalities: &InequalitySpec,
    hessian: Option<DMatrix<f64>>,
    opt: Option<Options>,
    progress: Option<&dyn ProgressMonitor>,
) -> Result<Solution> {
    let opt = opt.unwrap_or_default();
    opt.validate()?;

    let problem = Problem::new(parameters, inequalities)?;
    let (np, nineq) = (problem.np, problem.nineq);
    let npic = np + nineq;

    let hessian = match hessian {
        Some(h) => {
            if h.shape() != (npic, npic) {
                return Err(SolnpError::Precondition(format!(
                    "hessian must be {}x{} (parameters plus inequalities), got {}x{}",
                    npic,
                    npic,
                    h.nrows(),
                    h.ncols()
                )));
            }
            h
        }
        None => DMatrix::identity(npic, npic),
    };

    let eval = Evaluator::new(f_fn);
    let mut p = problem.p0.clone();
    let mut ob = eval.eval(&p.as_slice()[nineq..])?;
    if ob.len() < nineq + 1 {
        return Err(SolnpError::Precondition(format!(
            "objective function returned {} values, expected at least {} (objective plus inequalities)",
            ob.len(),
            nineq + 1
        )));
    }
    let dims = Dimensions {
        np,
        neq: ob.len() - 1 - nineq,
        nineq,
    };
    let nc = dims.nc();

    let mut rho = opt.rho;
    let mut j = ob[0];
    let mut history = vec![j];
    // Relative objective change, previous and current constraint norms.
    let mut t = [0.0; 3];

    let y = if nc > 0 {
        let cons = slack_residuals(dims, &ob, &mut p, &problem.bounds);
        t[1] = norm(cons.as_slice());
        if (t[1] - 10.0 * opt.tol).max(nineq as f64) <= 0.0 {
            // Feasible start with equalities only: no penalty needed.
            rho = 0.0;
        }
        DVector::zeros(nc)
    } else {
        DVector::zeros(1)
    };

    let mut state = SubnpState {
        p,
        y,
        hessian,
        mu: np as f64,
    };
    let subnp = Subnp::new(&eval, dims, problem.layout, &problem.bounds);

    let mut warnings = Vec::new();
    let mut iterations = 0;
    while iterations < opt.max_major_it {
        iterations += 1;

        let (next, w) = subnp.optimize(state, &ob, rho, &opt)?;
        state = next;
        warnings.extend(w);

        ob = eval.eval(&state.p.as_slice()[nineq..])?;
        t[0] = (j - ob[0]) / ob[0].abs().max(1.0);
        j = ob[0];

        if nc > 0 {
            let cons = slack_residuals(dims, &ob, &mut state.p, &problem.bounds);
            t[2] = norm(cons.as_slice());

            if t[2] < 10.0 * opt.tol {
                rho = 0.0;
                state.mu = state.mu.min(opt.tol);
            }
            if t[2] < 5.0 * t[1] {
                rho /= 5.0;
            } else if t[2] > 10.0 * t[1] {
                rho = 5.0 * rho.max(opt.tol.sqrt());
            }

            // The objective got worse without any gain in feasibility:
            // the multipliers and cross curvature are misleading.
            if (opt.tol + t[0]).max(t[1] - t[2]) <= 0.0 {
                state.y.fill(0.0);
                state.hessian = DMatrix::from_diagonal(&state.hessian.diagonal());
            }
            t[1] = t[2];
        }
        history.push(j);

        debug!(
            "major iteration {}: f = {}, df = {:e}, |c| = {:e}, rho = {:e}, mu = {:e}",
            iterations, j, t[0], t[1], rho, state.mu
        );
        if let Some(progress) = progress {
            progress.update(iterations, j, t[0], t[1], rho, state.mu);
        }

        if (t[0] * t[0] + t[1] * t[1]).sqrt() <= opt.tol {
            break;
        }
    }

    let converged = (t[0] * t[0] + t[1] * t[1]).sqrt() <= opt.tol;
    if converged {
        info!("converged in {} major iterations", iterations);
    } else {
        info!("did not converge in {} major iterations", iterations);
    }

    Ok(Solution {
        value: j,
        optimum: state.p.as_slice()[nineq..].to_vec(),
        converged,
        hessian: state.hessian,
        multipliers: state.y.as_slice().to_vec(),
        history,
        iterations,
        evaluations: eval.count(),
        warnings,
    })
}

/// Constraint residuals with each inequality value measured against its
/// slack. Slacks are first moved onto the inequality values when those all
/// lie strictly within their bounds.
fn slack_residuals(
    dims: Dimensions,
    ob: &DVector<f64>,
    p: &mut DVector<f64>,
    bounds: &DMatrix<f64>,
) -> DVector<f64> {
    let Dimensions { neq, nineq, .. } = dims;
    let mut cons = ob.rows(1, dims.nc()).into_owned();
    if nineq > 0 {
        let inside = (0..nineq).all(|i| {
            let h = cons[neq + i];
            h - bounds[(i, 0)] > 0.0 && bounds[(i, 1)] - h > 0.0
        });
        if inside {
            for i in 0..nineq {
                p[i] = cons[neq + i];
            }
        }
        for i in 0..nineq {
            cons[neq + i] -= p[i];
        }
    }
    cons
}
