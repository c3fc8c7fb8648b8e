use crate::common::{Options, Warning};
use crate::error::{Result, SolnpError};
use crate::linsol::{lstsq, qr_solve, Factor};
use crate::math::{bound_gaps, clamp, cond, max, min, min_max_rows, norm_inf};
use crate::problem::{BoundLayout, Dimensions, Evaluator};
use log::{debug, trace, warn};
use nalgebra::{DMatrix, DVector};

/// Iterate handed between major iterations. The outer controller owns it;
/// the subproblem consumes one and returns the next.
pub(crate) struct SubnpState {
    /// Slacks followed by decision variables.
    pub p: DVector<f64>,
    /// Lagrange multipliers (length one if there are no constraints).
    pub y: DVector<f64>,
    pub hessian: DMatrix<f64>,
    /// Levenberg-style damping on the quasi-Newton step.
    pub mu: f64,
}

/// Damping for the next minor iteration. Kept positive so that it can
/// still grow when a step has to be retried.
pub(crate) fn relaxed_damping(mu: f64) -> f64 {
    (mu / 10.0).max(f64::MIN_POSITIVE)
}

/// Normalization factors for one subproblem.
struct Scaling {
    /// Objective scale followed by one scale per constraint.
    cost: DVector<f64>,
    /// One scale per slack and decision variable.
    vars: DVector<f64>,
}

/// Augmented Lagrangian merit of the constraints' departure from their
/// linearization `a * p - b`.
struct Merit<'a> {
    dims: Dimensions,
    a: &'a DMatrix<f64>,
    b: &'a DVector<f64>,
    y: &'a DVector<f64>,
    rho: f64,
}

impl Merit<'_> {
    /// `ob` is a scaled cost vector evaluated at `p`.
    fn value(&self, mut ob: DVector<f64>, p: &DVector<f64>) -> f64 {
        let Dimensions { neq, nineq, .. } = self.dims;
        let nc = self.dims.nc();
        for i in 0..nineq {
            ob[1 + neq + i] -= p[i];
        }
        if nc == 0 {
            return ob[0];
        }
        let c = ob.rows(1, nc) - self.a * p + self.b;
        ob[0] - self.y.dot(&c) + self.rho * c.norm_squared()
    }
}

/// Solves one augmented Lagrangian subproblem around the current iterate.
pub(crate) struct Subnp<'a> {
    eval: &'a Evaluator<'a>,
    dims: Dimensions,
    layout: BoundLayout,
    /// Unscaled `[lower, upper]` rows for the bounded prefix of `p`.
    bounds: &'a DMatrix<f64>,
}

impl<'a> Subnp<'a> {
    pub fn new(
        eval: &'a Evaluator<'a>,
        dims: Dimensions,
        layout: BoundLayout,
        bounds: &'a DMatrix<f64>,
    ) -> Self {
        Self {
            eval,
            dims,
            layout,
            bounds,
        }
    }

    fn scaling(&self, ob: &DVector<f64>, p: &DVector<f64>, tol: f64) -> Scaling {
        let Dimensions { neq, nineq, .. } = self.dims;
        let npic = p.len();

        let mut scale = Vec::with_capacity(1 + neq + npic);
        if neq > 0 {
            scale.push(ob[0]);
            let eq = norm_inf(&ob.as_slice()[1..=neq]);
            scale.extend(std::iter::repeat(eq).take(neq));
        } else {
            scale.push(1.0);
        }
        if self.layout.any() {
            scale.extend(std::iter::repeat(1.0).take(npic));
        } else {
            scale.extend(p.iter().copied());
        }
        let scale = clamp(&DVector::from_vec(scale).abs(), tol, 1.0 / tol);

        Scaling {
            cost: scale.rows(0, 1 + neq + nineq).into_owned(),
            vars: scale.rows(1 + neq, npic).into_owned(),
        }
    }

    /// Scaled cost vector at the scaled working point `p`.
    fn cost(&self, sc: &Scaling, p: &DVector<f64>) -> Result<DVector<f64>> {
        let x: Vec<f64> = (self.dims.nineq..p.len())
            .map(|i| p[i] * sc.vars[i])
            .collect();
        let ob = self.eval.eval(&x)?;
        Ok(ob.component_div(&sc.cost))
    }

    pub fn optimize(
        &self,
        state: SubnpState,
        ob: &DVector<f64>,
        rho: f64,
        opt: &Options,
    ) -> Result<(SubnpState, Vec<Warning>)> {
        let Dimensions { np, neq, nineq } = self.dims;
        let (nc, npic) = (self.dims.nc(), self.dims.npic());
        let mm = self.bounds.nrows();
        let (tol, delta) = (opt.tol, opt.delta);
        let mut warnings = Vec::new();

        let SubnpState {
            p,
            y: y_in,
            hessian,
            mut mu,
        } = state;

        // Work in units where objective, constraints and parameters are
        // all of order one.
        let sc = self.scaling(ob, &p, tol);
        let scale0 = sc.cost[0];
        let mut ob = ob.component_div(&sc.cost);
        let mut p = p.component_div(&sc.vars);
        let bounds = DMatrix::from_fn(mm, 2, |i, j| self.bounds[(i, j)] / sc.vars[i]);
        let y0 = if nc > 0 {
            sc.cost.rows(1, nc).component_mul(&y_in) / scale0
        } else {
            y_in.clone()
        };
        let vv = &sc.vars * sc.vars.transpose();
        let mut hessian = hessian.component_mul(&vv) / scale0;

        let mut a = DMatrix::<f64>::zeros(nc, npic);
        let mut b = DVector::<f64>::zeros(nc);
        let mut g = DVector::<f64>::zeros(npic);
        let mut positive_change = true;

        if nc > 0 {
            for i in 0..nineq {
                a[(neq + i, i)] = -1.0;
            }

            // Linearize the constraints. The objective differences are kept
            // as the first gradient, which saves a round of evaluations when
            // no restoration is needed.
            let obj = ob[0];
            let mut constraints = ob.rows(1, nc).into_owned();
            for i in 0..np {
                let k = nineq + i;
                let mut pt = p.clone();
                pt[k] += delta;
                let cost = self.cost(&sc, &pt)?;
                g[k] = (cost[0] - obj) / delta;
                a.set_column(k, &((cost.rows(1, nc) - &constraints) / delta));
            }
            for i in 0..nineq {
                constraints[neq + i] -= p[i];
            }

            let condition = cond(&a);
            if condition > 1.0 / f64::EPSILON {
                warn!(
                    "redundant constraints found, Jacobian condition number {:e}",
                    condition
                );
                warnings.push(Warning::RedundantConstraints { condition });
            }
            b = &a * &p - &constraints;

            positive_change = false;
            let mut alpha = tol - norm_inf(constraints.as_slice());
            if alpha <= 0.0 {
                positive_change = true;
                if !self.layout.any() {
                    // Without bounds, project straight onto the linearized
                    // constraints.
                    let aat = &a * a.transpose();
                    let step = qr_solve(aat, &constraints, "constraint projection")?;
                    p -= a.transpose() * step;
                    alpha = 1.0;
                }
            }
            if alpha <= 0.0 {
                p = self.restore(p, &a, &constraints, &bounds, tol, &mut warnings)?;
                b = &a * &p;
            }
        }

        let mut y = DVector::<f64>::zeros(y_in.len());
        if positive_change {
            ob = self.cost(&sc, &p)?;
        }
        let merit = Merit {
            dims: self.dims,
            a: &a,
            b: &b,
            y: &y0,
            rho,
        };
        let mut j = merit.value(ob, &p);

        let mut previous: Option<(DVector<f64>, DVector<f64>)> = None;
        let mut reduction = 0.0;
        let mut minit = 0;
        while minit < opt.max_minor_it {
            minit += 1;

            if positive_change {
                for i in 0..np {
                    let k = nineq + i;
                    let mut pt = p.clone();
                    pt[k] += delta;
                    let cost = self.cost(&sc, &pt)?;
                    g[k] = (merit.value(cost, &pt) - j) / delta;
                }
                // Slacks are steered through their bounds only.
                for i in 0..nineq {
                    g[i] = 0.0;
                }
            }

            // BFGS update from the last secant pair, skipped unless the
            // curvature condition holds.
            if let Some((p_prev, g_prev)) = &previous {
                let s = &p - p_prev;
                let yk = &g - g_prev;
                let hs = &hessian * &s;
                let sc0 = s.dot(&hs);
                let sc1 = s.dot(&yk);
                if sc0 > 0.0 && sc1 > 0.0 {
                    hessian = &hessian - &hs * hs.transpose() / sc0 + &yk * yk.transpose() / sc1;
                }
            }

            // Damping weights grow as a variable nears one of its bounds.
            let mut dx = DVector::from_element(npic, 0.01);
            if self.layout.any() {
                let gap = min_max_rows(&bound_gaps(&p, &bounds));
                for i in 0..mm {
                    dx[i] = 1.0 / (gap[(i, 0)] + f64::EPSILON.sqrt());
                }
                if !self.layout.parameters() {
                    let fill = min(&dx.as_slice()[..mm]).min(0.01);
                    for i in mm..npic {
                        dx[i] = fill;
                    }
                }
            }

            mu = relaxed_damping(mu);
            let (p_trial, y_trial) = loop {
                if !mu.is_finite() {
                    return Err(SolnpError::Singular(
                        "no damping keeps the quasi-Newton step positive definite and within bounds"
                            .to_string(),
                    ));
                }
                match self.newton_step(&hessian, &dx, mu, &g, &a, tol)? {
                    None => mu *= 3.0,
                    Some((u, yk)) => {
                        let p_trial = &p + u;
                        if !self.layout.any() {
                            break (p_trial, yk);
                        }
                        let go = min(bound_gaps(&p_trial, &bounds).as_slice());
                        mu *= 3.0;
                        if go > 0.0 {
                            break (p_trial, yk);
                        }
                    }
                }
            };

            // Bracketing line search on the segment from p to p_trial.
            let mut alpha = [0.0, 0.0, 1.0];
            let mut pts = [p.clone(), p.clone(), p_trial.clone()];
            let mut sob = [j, j, 0.0];
            sob[2] = merit.value(self.cost(&sc, &pts[2])?, &pts[2]);

            let mut go = 1.0;
            while go > tol {
                alpha[1] = 0.5 * (alpha[0] + alpha[2]);
                pts[1] = &p * (1.0 - alpha[1]) + &p_trial * alpha[1];
                sob[1] = merit.value(self.cost(&sc, &pts[1])?, &pts[1]);

                let obm = max(&sob);
                if obm < j {
                    let obn = min(&sob);
                    go = tol * (obm - obn) / (j - obm);
                }

                if sob[1] >= sob[0] || sob[0] <= sob[2] {
                    sob[2] = sob[1];
                    alpha[2] = alpha[1];
                    pts[2] = pts[1].clone();
                } else {
                    sob[0] = sob[1];
                    alpha[0] = alpha[1];
                    pts[0] = pts[1].clone();
                }

                if go >= tol {
                    go = alpha[2] - alpha[0];
                }
            }

            let obn = min(&sob);
            let stalled = j <= obn;
            reduction = (j - obn) / (1.0 + j.abs());

            let best = if sob[0] < sob[1] {
                0
            } else if sob[2] < sob[1] {
                2
            } else {
                1
            };
            j = sob[best];
            let p_prev = std::mem::replace(&mut p, pts[best].clone());
            previous = Some((p_prev, g.clone()));
            positive_change = true;
            if let Some(yk) = y_trial {
                y = yk;
            }

            trace!(
                "minor iteration {}: merit = {}, reduction = {:e}, mu = {:e}",
                minit,
                j,
                reduction,
                mu
            );
            if stalled || reduction < tol {
                break;
            }
        }

        // Back to problem units.
        let p = p.component_mul(&sc.vars);
        let y = if nc > 0 {
            y.component_div(&sc.cost.rows(1, nc)) * scale0
        } else {
            y
        };
        let hessian = hessian.component_div(&vv) * scale0;
        let hessian = (&hessian + hessian.transpose()) / 2.0;

        if reduction > tol {
            warn!(
                "subproblem did not converge in {} minor iterations, relative reduction {:e}",
                minit, reduction
            );
            warnings.push(Warning::SubproblemNotConverged { reduction });
        }

        Ok((SubnpState { p, y, hessian, mu }, warnings))
    }

    /// Damped quasi-Newton direction, projected onto the null space of the
    /// linearized constraints when there are any. Returns `None` if the
    /// damped curvature matrix is not positive definite.
    fn newton_step(
        &self,
        hessian: &DMatrix<f64>,
        dx: &DVector<f64>,
        mu: f64,
        g: &DVector<f64>,
        a: &DMatrix<f64>,
        tol: f64,
    ) -> Result<Option<(DVector<f64>, Option<DVector<f64>>)>> {
        let damped = hessian + DMatrix::from_diagonal(&dx.map(|v| v * v)) * mu;
        let factor = match Factor::new(damped) {
            Some(factor) => factor,
            None => return Ok(None),
        };

        let yg = factor.solve_l_vec(g)?;
        if self.dims.nc() == 0 {
            let u = -factor.solve_lt(&yg)?;
            return Ok(Some((u, None)));
        }

        let la = factor.solve_l(&a.transpose())?;
        // Redundant constraints leave `la` rank deficient; the minimum-norm
        // multipliers still give the projection onto its null space.
        let y = lstsq(la.clone(), &yg, tol, "quasi-Newton step")?;
        let u = -factor.solve_lt(&(yg - la * &y))?;
        Ok(Some((u, Some(y))))
    }

    /// Drives the linearized constraint violation to zero while keeping the
    /// bounded variables strictly inside their bounds. An artificial
    /// variable, appended to `p` and started at one, measures the remaining
    /// infeasibility. Failing to remove it is not an error: the best point
    /// found is returned with a warning.
    fn restore(
        &self,
        p: DVector<f64>,
        a: &DMatrix<f64>,
        constraints: &DVector<f64>,
        bounds: &DMatrix<f64>,
        tol: f64,
        warnings: &mut Vec<Warning>,
    ) -> Result<DVector<f64>> {
        let npic = p.len();
        let (nc, mm) = (a.nrows(), bounds.nrows());

        let mut pa = DVector::from_fn(npic + 1, |i, _| if i < npic { p[i] } else { 1.0 });
        let aug = DMatrix::from_fn(nc, npic + 1, |i, j| {
            if j < npic {
                a[(i, j)]
            } else {
                -constraints[i]
            }
        });
        let mut c = DVector::<f64>::zeros(npic + 1);
        c[npic] = 1.0;
        let mut dx = DVector::from_element(npic + 1, 1.0);

        let mut go = 1.0;
        let mut steps = 0;
        while go >= tol {
            steps += 1;

            let gap = min_max_rows(&bound_gaps(&pa, bounds));
            for i in 0..mm {
                dx[i] = gap[(i, 0)];
            }
            dx[npic] = pa[npic];
            if !self.layout.parameters() {
                let fill = max(&dx.as_slice()[..mm]).max(100.0);
                for i in mm..npic {
                    dx[i] = fill;
                }
            }

            let scaled = (&aug * DMatrix::from_diagonal(&dx)).transpose();
            let rhs = dx.component_mul(&c);
            let y = match lstsq(scaled, &rhs, tol, "feasibility restoration") {
                Ok(y) => y,
                Err(e) => {
                    debug!("{}", e);
                    steps = 10;
                    break;
                }
            };
            let v = dx.component_mul(&dx.component_mul(&(&c - aug.transpose() * &y)));

            if v[npic] > 0.0 {
                // Ratio test: the largest step that keeps every bounded
                // variable feasible, capped by the step that zeroes the
                // artificial variable.
                let full = pa[npic] / v[npic];
                let mut step = full;
                for k in 0..mm {
                    if v[k] < 0.0 {
                        step = step.min(-(bounds[(k, 1)] - pa[k]) / v[k]);
                    } else if v[k] > 0.0 {
                        step = step.min((pa[k] - bounds[(k, 0)]) / v[k]);
                    }
                }
                if step >= full {
                    pa -= &v * step;
                } else {
                    pa -= &v * (0.9 * step);
                }

                go = pa[npic];
                if steps >= 10 {
                    go = 0.0;
                }
            } else {
                go = 0.0;
                steps = 10;
            }
        }

        if steps >= 10 {
            let infeasibility = pa[npic];
            warn!(
                "feasibility restoration incomplete, infeasibility {:e}",
                infeasibility
            );
            warnings.push(Warning::RestorationIncomplete { infeasibility });
        }

        Ok(pa.rows(0, npic).into_owned())
    }
}
