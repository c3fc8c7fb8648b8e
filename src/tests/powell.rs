use float_cmp::assert_approx_eq;

use crate::{solnp, BoundsSpec, InequalitySpec};

/// Powell's equality constrained exponential problem:
///
/// ```txt
///     min exp(x1 x2 x3 x4 x5)
///     s.t. x1^2 + x2^2 + x3^2 + x4^2 + x5^2 = 10
///          x2 x3 - 5 x4 x5 = 0
///          x1^3 + x2^3 = -1
/// ```
fn powell(x: &[f64]) -> Vec<f64> {
    vec![
        x.iter().product::<f64>().exp(),
        x.iter().map(|v| v * v).sum::<f64>() - 10.0,
        x[1] * x[2] - 5.0 * x[3] * x[4],
        x[0].powi(3) + x[1].powi(3) + 1.0,
    ]
}

#[test]
fn powell_exponential() -> anyhow::Result<()> {
    let sol = solnp(
        &powell,
        &BoundsSpec::Unbounded(vec![-2.0, 2.0, 2.0, -1.0, -1.0]),
        &InequalitySpec::None,
        None,
        None,
        None,
    )?;

    assert_approx_eq!(f64, sol.value, 0.053949848, epsilon = 1e-4);
    let expected = [-1.717143, 1.595709, 1.827247, -0.763643, -0.763643];
    for (x, e) in sol.optimum.iter().zip(expected) {
        assert_approx_eq!(f64, *x, e, epsilon = 1e-3);
    }
    let residual = powell(&sol.optimum)[1..]
        .iter()
        .map(|c| c * c)
        .sum::<f64>()
        .sqrt();
    assert!(residual < 1e-5, "constraint residual {}", residual);
    assert_eq!(sol.multipliers.len(), 3);
    Ok(())
}
