use crate::error::{Result, SolnpError};
use crate::math::max;
use nalgebra::linalg::{Cholesky, QR, SVD};
use nalgebra::{DMatrix, DVector, Dyn};

/// Solves `min ||m * y - r||` through a thin QR factorization of `m`.
///
/// `m` must have at least as many rows as columns. A zero on the diagonal
/// of `R` means the system is singular.
pub fn qr_solve(m: DMatrix<f64>, r: &DVector<f64>, context: &str) -> Result<DVector<f64>> {
    let (rows, cols) = m.shape();
    if rows < cols {
        return Err(SolnpError::Singular(format!(
            "{}: {} equations for {} unknowns",
            context, rows, cols
        )));
    }
    let qr = QR::new(m);
    let (q, r_mat) = (qr.q(), qr.r());
    if r_mat.diagonal().iter().any(|&d| d == 0.0) {
        return Err(SolnpError::Singular(format!(
            "{}: zero pivot in QR factorization",
            context
        )));
    }
    let qtr = q.transpose() * r;
    r_mat
        .solve_upper_triangular(&qtr)
        .ok_or_else(|| SolnpError::Singular(format!("{}: triangular solve failed", context)))
}

/// Minimum-norm solution of `min ||m * y - r||` through an SVD of `m`.
///
/// Singular values below `rcond` times the largest one are treated as zero,
/// so rank deficient and wide systems are solved on the subspace they
/// determine.
pub fn lstsq(
    m: DMatrix<f64>,
    r: &DVector<f64>,
    rcond: f64,
    context: &str,
) -> Result<DVector<f64>> {
    let max_niter = 100 * (m.nrows() + m.ncols()).max(1);
    let svd = SVD::try_new(m, true, true, f64::EPSILON, max_niter)
        .ok_or_else(|| SolnpError::Singular(format!("{}: SVD did not converge", context)))?;
    let eps = rcond * max(svd.singular_values.as_slice()).max(0.0);
    svd.solve(r, eps)
        .map_err(|e| SolnpError::Singular(format!("{}: {}", context, e)))
}

/// Lower Cholesky factor `L` of a symmetric positive definite matrix
/// (`A = L * L'`).
pub struct Factor {
    l: DMatrix<f64>,
}

impl Factor {
    /// Returns `None` when `a` is not positive definite.
    pub fn new(a: DMatrix<f64>) -> Option<Self> {
        Cholesky::<f64, Dyn>::new(a).map(|chol| Self { l: chol.unpack() })
    }

    /// Solves `L * x = b`.
    pub fn solve_l(&self, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.l
            .solve_lower_triangular(b)
            .ok_or_else(|| SolnpError::Singular("zero pivot in Cholesky factor".to_string()))
    }

    /// Solves `L' * x = b`.
    pub fn solve_lt(&self, b: &DVector<f64>) -> Result<DVector<f64>> {
        self.l
            .tr_solve_lower_triangular(b)
            .ok_or_else(|| SolnpError::Singular("zero pivot in Cholesky factor".to_string()))
    }

    /// Solves `L * x = b` for a single right hand side.
    pub fn solve_l_vec(&self, b: &DVector<f64>) -> Result<DVector<f64>> {
        self.l
            .solve_lower_triangular(b)
            .ok_or_else(|| SolnpError::Singular("zero pivot in Cholesky factor".to_string()))
    }
}
