use crate::error::{Result, SolnpError};
use nalgebra::DMatrix;
use std::fmt;

#[derive(Clone, Debug)]
pub struct Options {
    /// Initial penalty coefficient on the squared constraint norm in the
    /// augmented Lagrangian.
    pub rho: f64,

    /// Maximum number of major (outer) iterations.
    pub max_major_it: usize,
    /// Maximum number of minor (quasi-Newton) iterations per major iteration.
    pub max_minor_it: usize,

    /// Forward-difference step used to estimate gradients, in scaled units.
    pub delta: f64,
    /// Convergence tolerance. Also the threshold below which pivots and
    /// reductions are treated as zero.
    pub tol: f64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            rho: 1.0,

            max_major_it: 400,
            max_minor_it: 800,

            delta: 1e-7,
            tol: 1e-8,
        }
    }
}

impl Options {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.tol > 0.0) || (self.tol * self.tol).is_infinite() {
            return Err(SolnpError::Precondition(format!(
                "tolerance ({}) must be positive and must not overflow when squared",
                self.tol
            )));
        }
        if !(self.delta > 0.0) || !self.delta.is_finite() {
            return Err(SolnpError::Precondition(format!(
                "finite-difference step ({}) must be positive",
                self.delta
            )));
        }
        if !(self.rho >= 0.0) || !self.rho.is_finite() {
            return Err(SolnpError::Precondition(format!(
                "penalty coefficient ({}) must be non-negative",
                self.rho
            )));
        }
        Ok(())
    }
}

/// Parameter vector encoding: an initial guess, box bounds or both.
#[derive(Clone, Debug, PartialEq)]
pub enum BoundsSpec {
    /// Unbounded parameters; the values are the initial guess.
    Unbounded(Vec<f64>),
    /// Bounded parameters started from the midpoint of each range.
    Range { lower: Vec<f64>, upper: Vec<f64> },
    /// Bounded parameters with an explicit initial guess.
    RangeWithGuess {
        guess: Vec<f64>,
        lower: Vec<f64>,
        upper: Vec<f64>,
    },
}

impl BoundsSpec {
    /// Resolves the column encoding of a parameter matrix: one column is an
    /// unbounded guess, two are `[lower, upper]` and three are
    /// `[guess, lower, upper]`.
    pub fn from_columns(m: &DMatrix<f64>) -> Result<Self> {
        let col = |j: usize| m.column(j).iter().copied().collect::<Vec<f64>>();
        match m.ncols() {
            1 => Ok(BoundsSpec::Unbounded(col(0))),
            2 => Ok(BoundsSpec::Range {
                lower: col(0),
                upper: col(1),
            }),
            3 => Ok(BoundsSpec::RangeWithGuess {
                guess: col(0),
                lower: col(1),
                upper: col(2),
            }),
            n => Err(SolnpError::Precondition(format!(
                "parameter array must have one to three columns, got {}",
                n
            ))),
        }
    }
}

/// Bounds on the inequality values reported by the objective function.
#[derive(Clone, Debug, PartialEq)]
pub enum InequalitySpec {
    /// No inequality constraints.
    None,
    /// `lower < h(x) < upper`, slacks started from the midpoints.
    Range { lower: Vec<f64>, upper: Vec<f64> },
    /// `lower < h(x) < upper` with an explicit initial slack guess.
    RangeWithGuess {
        guess: Vec<f64>,
        lower: Vec<f64>,
        upper: Vec<f64>,
    },
}

impl InequalitySpec {
    /// Resolves the column encoding of an inequality matrix. Zero or one
    /// column means no inequality constraints.
    pub fn from_columns(m: &DMatrix<f64>) -> Result<Self> {
        let col = |j: usize| m.column(j).iter().copied().collect::<Vec<f64>>();
        match m.ncols() {
            0 | 1 => Ok(InequalitySpec::None),
            2 => Ok(InequalitySpec::Range {
                lower: col(0),
                upper: col(1),
            }),
            3 => Ok(InequalitySpec::RangeWithGuess {
                guess: col(0),
                lower: col(1),
                upper: col(2),
            }),
            n => Err(SolnpError::Precondition(format!(
                "inequality constraints must have two or three columns, got {}",
                n
            ))),
        }
    }
}

/// Non-fatal conditions met during a solve.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Warning {
    /// The constraint Jacobian is numerically rank deficient.
    RedundantConstraints { condition: f64 },
    /// Feasibility restoration hit its step cap with the artificial
    /// infeasibility variable still positive.
    RestorationIncomplete { infeasibility: f64 },
    /// A subproblem exhausted its minor iterations before the relative
    /// merit reduction fell below tolerance.
    SubproblemNotConverged { reduction: f64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::RedundantConstraints { condition } => write!(
                f,
                "redundant constraints found, Jacobian condition number {:e}",
                condition
            ),
            Warning::RestorationIncomplete { infeasibility } => write!(
                f,
                "feasibility restoration incomplete, infeasibility {:e}",
                infeasibility
            ),
            Warning::SubproblemNotConverged { reduction } => write!(
                f,
                "subproblem did not converge, relative reduction {:e}",
                reduction
            ),
        }
    }
}

/// Outcome of a solve.
#[derive(Clone, Debug)]
pub struct Solution {
    /// Objective value at the optimum.
    pub value: f64,
    /// Decision variables (inequality slacks excluded).
    pub optimum: Vec<f64>,
    /// Set when the relative objective change and the constraint norm
    /// both vanished to within tolerance.
    pub converged: bool,
    /// Final curvature matrix over slacks and decision variables. Can be
    /// passed back in to warm-start another solve.
    pub hessian: DMatrix<f64>,

    /// Lagrange multipliers on the equality then inequality constraints
    /// (a single zero when the problem has none).
    pub multipliers: Vec<f64>,
    /// Objective value at the initial point followed by one value per major
    /// iteration.
    pub history: Vec<f64>,
    /// Number of major iterations performed.
    pub iterations: usize,
    /// Number of objective function evaluations.
    pub evaluations: usize,
    /// Non-fatal conditions met along the way, in the order they occurred.
    pub warnings: Vec<Warning>,
}
