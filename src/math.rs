use nalgebra::{DMatrix, DVector};

/// Returns the maximum value of `a`, or negative infinity if `a` is empty.
pub fn max(a: &[f64]) -> f64 {
    a.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Returns the minimum value of `a`, or infinity if `a` is empty.
pub fn min(a: &[f64]) -> f64 {
    a.iter().copied().fold(f64::INFINITY, f64::min)
}

/// Computes the infinity norm: `max(abs(a))`
pub fn norm_inf(a: &[f64]) -> f64 {
    a.iter().fold(0.0, |m: f64, v| m.max(v.abs()))
}

/// Returns the 2-norm (Euclidean) of `a`.
pub fn norm(a: &[f64]) -> f64 {
    a.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Ratio of the largest to the smallest singular value of `a`.
///
/// Infinite when `a` is rank deficient to working precision, i.e. when the
/// smallest singular value is exactly zero.
pub fn cond(a: &DMatrix<f64>) -> f64 {
    if a.is_empty() {
        return 1.0;
    }
    let sv = a.singular_values();
    let (s_max, s_min) = (max(sv.as_slice()), min(sv.as_slice()));
    if s_min > 0.0 {
        s_max / s_min
    } else {
        f64::INFINITY
    }
}

/// Reorders each row of a two-column matrix so that the left column holds
/// the row minimum and the right column the row maximum.
pub fn min_max_rows(m: &DMatrix<f64>) -> DMatrix<f64> {
    debug_assert_eq!(m.ncols(), 2, "min_max_rows expects two columns");
    DMatrix::from_fn(m.nrows(), 2, |i, j| {
        let (a, b) = (m[(i, 0)], m[(i, 1)]);
        if j == 0 {
            a.min(b)
        } else {
            a.max(b)
        }
    })
}

/// Clamps every element of `v` into `[lo, hi]`.
pub fn clamp(v: &DVector<f64>, lo: f64, hi: f64) -> DVector<f64> {
    v.map(|x| x.max(lo).min(hi))
}

/// Distances from the first `bounds.nrows()` entries of `p` to their lower
/// and upper bounds, as a `(p - lower, upper - p)` two-column matrix.
pub fn bound_gaps(p: &DVector<f64>, bounds: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(bounds.nrows(), 2, |i, j| {
        if j == 0 {
            p[i] - bounds[(i, 0)]
        } else {
            bounds[(i, 1)] - p[i]
        }
    })
}
