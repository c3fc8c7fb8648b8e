use crate::common::{BoundsSpec, InequalitySpec};
use crate::error::{Result, SolnpError};
use crate::traits::ObjectiveFunction;
use nalgebra::{DMatrix, DVector};
use std::cell::Cell;

/// Which entries of the working parameter vector carry box bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum BoundLayout {
    /// Nothing is bounded.
    Unbounded,
    /// Only the inequality slacks (which are always bounded).
    SlacksOnly,
    /// Slacks and decision variables.
    All,
}

impl BoundLayout {
    /// True if any entry is bounded.
    pub fn any(self) -> bool {
        self != BoundLayout::Unbounded
    }

    /// True if the decision variables are bounded.
    pub fn parameters(self) -> bool {
        self == BoundLayout::All
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Dimensions {
    /// Decision variables.
    pub np: usize,
    /// Equality constraints.
    pub neq: usize,
    /// Inequality constraints (and slack variables).
    pub nineq: usize,
}

impl Dimensions {
    pub fn nc(&self) -> usize {
        self.neq + self.nineq
    }

    /// Length of the working parameter vector: slacks followed by the
    /// decision variables.
    pub fn npic(&self) -> usize {
        self.np + self.nineq
    }
}

/// Validated problem data in canonical form.
pub(crate) struct Problem {
    /// Inequality slacks followed by decision variables.
    pub p0: DVector<f64>,
    /// `[lower, upper]` rows for the bounded prefix of `p0`.
    pub bounds: DMatrix<f64>,
    pub np: usize,
    pub nineq: usize,
    pub layout: BoundLayout,
}

fn check_range(what: &str, lower: &[f64], upper: &[f64]) -> Result<()> {
    if lower.len() != upper.len() {
        return Err(SolnpError::Precondition(format!(
            "{} lower bounds ({}) and upper bounds ({}) differ in length",
            what,
            lower.len(),
            upper.len()
        )));
    }
    if lower.iter().zip(upper).any(|(l, u)| !(u - l > 0.0)) {
        return Err(SolnpError::Precondition(format!(
            "the lower bounds of the {} must be strictly less than the upper bounds",
            what
        )));
    }
    Ok(())
}

fn check_interior(what: &str, guess: &[f64], lower: &[f64], upper: &[f64]) -> Result<()> {
    if guess.len() != lower.len() {
        return Err(SolnpError::Precondition(format!(
            "{} initial values ({}) and bounds ({}) differ in length",
            what,
            guess.len(),
            lower.len()
        )));
    }
    let inside = guess
        .iter()
        .zip(lower.iter().zip(upper))
        .all(|(g, (l, u))| g - l > 0.0 && u - g > 0.0);
    if !inside {
        return Err(SolnpError::Precondition(format!(
            "initial {} must be strictly within the bounds",
            what
        )));
    }
    Ok(())
}

fn midpoint(lower: &[f64], upper: &[f64]) -> Vec<f64> {
    lower.iter().zip(upper).map(|(l, u)| 0.5 * (l + u)).collect()
}

/// Resolves a ranged encoding to `(guess, lower, upper)`.
fn resolve_range(
    what: &str,
    guess: Option<&[f64]>,
    lower: &[f64],
    upper: &[f64],
) -> Result<(Vec<f64>, Vec<f64>, Vec<f64>)> {
    check_range(what, lower, upper)?;
    let guess = match guess {
        Some(guess) => guess.to_vec(),
        None => midpoint(lower, upper),
    };
    check_interior(what, &guess, lower, upper)?;
    Ok((guess, lower.to_vec(), upper.to_vec()))
}

impl Problem {
    pub fn new(parameters: &BoundsSpec, inequalities: &InequalitySpec) -> Result<Self> {
        let (guess, param_bounds) = match parameters {
            BoundsSpec::Unbounded(guess) => (guess.clone(), None),
            BoundsSpec::Range { lower, upper } => {
                let (g, l, u) = resolve_range("parameters", None, lower, upper)?;
                (g, Some((l, u)))
            }
            BoundsSpec::RangeWithGuess {
                guess,
                lower,
                upper,
            } => {
                let (g, l, u) = resolve_range("parameters", Some(guess), lower, upper)?;
                (g, Some((l, u)))
            }
        };
        let np = guess.len();
        if np == 0 {
            return Err(SolnpError::Precondition(
                "at least one parameter is required".to_string(),
            ));
        }

        let ineq = match inequalities {
            InequalitySpec::None => None,
            InequalitySpec::Range { lower, upper } => {
                Some(resolve_range("inequalities", None, lower, upper)?)
            }
            InequalitySpec::RangeWithGuess {
                guess,
                lower,
                upper,
            } => Some(resolve_range("inequalities", Some(guess), lower, upper)?),
        }
        .filter(|(g, _, _)| !g.is_empty());
        let nineq = ineq.as_ref().map_or(0, |(g, _, _)| g.len());

        let layout = match (&param_bounds, &ineq) {
            (Some(_), _) => BoundLayout::All,
            (None, Some(_)) => BoundLayout::SlacksOnly,
            (None, None) => BoundLayout::Unbounded,
        };

        // Slacks are stacked ahead of the decision variables.
        let mut p0 = Vec::with_capacity(np + nineq);
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        if let Some((g, l, u)) = &ineq {
            p0.extend_from_slice(g);
            lower.extend_from_slice(l);
            upper.extend_from_slice(u);
        }
        p0.extend_from_slice(&guess);
        if let Some((l, u)) = &param_bounds {
            lower.extend_from_slice(l);
            upper.extend_from_slice(u);
        }
        let mm = lower.len();
        let bounds = DMatrix::from_fn(mm, 2, |i, j| if j == 0 { lower[i] } else { upper[i] });

        Ok(Self {
            p0: DVector::from_vec(p0),
            bounds,
            np,
            nineq,
            layout,
        })
    }
}

/// Wraps the user function: counts calls and enforces a fixed output length.
pub(crate) struct Evaluator<'a> {
    f_fn: &'a dyn ObjectiveFunction,
    len: Cell<Option<usize>>,
    count: Cell<usize>,
}

impl<'a> Evaluator<'a> {
    pub fn new(f_fn: &'a dyn ObjectiveFunction) -> Self {
        Self {
            f_fn,
            len: Cell::new(None),
            count: Cell::new(0),
        }
    }

    /// Evaluates the user function at the decision variables `x`.
    pub fn eval(&self, x: &[f64]) -> Result<DVector<f64>> {
        self.count.set(self.count.get() + 1);
        let cost = self.f_fn.f(x);
        match self.len.get() {
            None => {
                if cost.is_empty() {
                    return Err(SolnpError::Precondition(
                        "objective function returned an empty vector".to_string(),
                    ));
                }
                self.len.set(Some(cost.len()));
            }
            Some(n) if n != cost.len() => {
                return Err(SolnpError::Precondition(format!(
                    "objective function returned {} values, previously {}",
                    cost.len(),
                    n
                )));
            }
            Some(_) => {}
        }
        Ok(DVector::from_vec(cost))
    }

    pub fn count(&self) -> usize {
        self.count.get()
    }
}
