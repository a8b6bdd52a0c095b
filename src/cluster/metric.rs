//! Per-observation metric helpers.
//!
//! Every observation carries its own symmetric positive-definite matrix `M_i`
//! (a precision matrix). Distances are always measured under the metric of
//! the observation, never under a pooled or averaged one:
//!
//! ```text
//! d²(x_i, c) = (x_i − c)ᵀ · M_i · (x_i − c)
//! ```

use crate::error::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Relative tolerance for the symmetry check in [`validate_metric`].
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Squared Mahalanobis distance of `x` to `c` under `metric`.
///
/// `metric` must be `d × d` with `d = x.len() = c.len()`.
#[inline]
pub fn mahalanobis_sq(x: &[f64], c: &[f64], metric: &DMatrix<f64>) -> f64 {
    debug_assert_eq!(x.len(), c.len());
    debug_assert_eq!(metric.nrows(), x.len());
    debug_assert_eq!(metric.ncols(), x.len());

    let d = x.len();
    let mut acc = 0.0;
    for r in 0..d {
        let dr = x[r] - c[r];
        if dr == 0.0 {
            continue;
        }
        let mut row = 0.0;
        for col in 0..d {
            row += metric[(r, col)] * (x[col] - c[col]);
        }
        acc += dr * row;
    }
    acc
}

/// Check that `metric` is square of size `dim`, symmetric, and positive-definite.
///
/// `index` is the owning observation, reported back in the error.
pub fn validate_metric(index: usize, metric: &DMatrix<f64>, dim: usize) -> Result<()> {
    check_shape(metric, dim)?;

    for r in 0..dim {
        for c in (r + 1)..dim {
            let a = metric[(r, c)];
            let b = metric[(c, r)];
            if !a.is_finite() || !b.is_finite() {
                return Err(Error::InvalidMetric {
                    index,
                    reason: "contains non-finite entries",
                });
            }
            let scale = a.abs().max(b.abs()).max(1.0);
            if (a - b).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(Error::InvalidMetric {
                    index,
                    reason: "not symmetric",
                });
            }
        }
    }

    if metric.clone().cholesky().is_none() {
        return Err(Error::InvalidMetric {
            index,
            reason: "not positive-definite",
        });
    }
    Ok(())
}

pub(crate) fn check_shape(metric: &DMatrix<f64>, dim: usize) -> Result<()> {
    if metric.nrows() != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            found: metric.nrows(),
        });
    }
    if metric.ncols() != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            found: metric.ncols(),
        });
    }
    Ok(())
}

/// Solve `a · x = b` for a (nominally) SPD `a`.
///
/// Cholesky first; LU when the matrix is invertible but not positive-definite.
/// `ridge > 0` adds `ridge · I` to `a` before factoring.
pub(crate) fn solve_spd(
    mut a: DMatrix<f64>,
    b: &DVector<f64>,
    ridge: f64,
    context: impl FnOnce() -> String,
) -> Result<DVector<f64>> {
    if ridge > 0.0 {
        for i in 0..a.nrows() {
            a[(i, i)] += ridge;
        }
    }

    let solved = match a.clone().cholesky() {
        Some(chol) => Some(chol.solve(b)),
        None => a.lu().solve(b),
    };

    match solved {
        Some(x) if x.iter().all(|v| v.is_finite()) => Ok(x),
        _ => Err(Error::SingularMatrix { context: context() }),
    }
}

/// Smallest accepted ratio `L_ii² / a_ii` of a Cholesky pivot to its diagonal entry.
const PIVOT_TOLERANCE: f64 = 1e-9;

/// Invert a symmetric positive-definite matrix by Cholesky.
///
/// There is no LU fallback: the inverse of an indefinite matrix is not a usable
/// metric. A failed factorization, or a pivot that keeps less than
/// [`PIVOT_TOLERANCE`] of its diagonal entry (a rank-deficient matrix that only
/// factors through rounding), is `SingularMatrix`.
pub(crate) fn invert_spd(a: &DMatrix<f64>, context: impl FnOnce() -> String) -> Result<DMatrix<f64>> {
    let Some(chol) = a.clone().cholesky() else {
        return Err(Error::SingularMatrix { context: context() });
    };

    let l = chol.l_dirty();
    let degenerate = (0..a.nrows()).any(|i| {
        let pivot = l[(i, i)] * l[(i, i)];
        pivot <= PIVOT_TOLERANCE * a[(i, i)] || !pivot.is_finite()
    });
    if degenerate {
        return Err(Error::SingularMatrix { context: context() });
    }

    let inv = chol.inverse();
    if inv.iter().all(|v| v.is_finite()) {
        Ok(inv)
    } else {
        Err(Error::SingularMatrix { context: context() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identity_metric_is_squared_euclidean() {
        let m = DMatrix::<f64>::identity(3, 3);
        let d = mahalanobis_sq(&[1.0, 2.0, 3.0], &[0.0, 0.0, 1.0], &m);
        assert_abs_diff_eq!(d, 1.0 + 4.0 + 4.0, epsilon = 1e-12);
    }

    #[test]
    fn off_diagonal_terms_count() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        // [1, 1] · M · [1, 1]ᵀ = 2 + 0.5 + 0.5 + 1
        let d = mahalanobis_sq(&[1.0, 1.0], &[0.0, 0.0], &m);
        assert_abs_diff_eq!(d, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn validate_accepts_spd() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        assert!(validate_metric(0, &m, 2).is_ok());
    }

    #[test]
    fn validate_rejects_asymmetric() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 0.0, 3.0]);
        assert!(matches!(
            validate_metric(5, &m, 2),
            Err(Error::InvalidMetric { index: 5, .. })
        ));
    }

    #[test]
    fn validate_rejects_indefinite() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(matches!(
            validate_metric(1, &m, 2),
            Err(Error::InvalidMetric {
                reason: "not positive-definite",
                ..
            })
        ));
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let m = DMatrix::<f64>::identity(3, 3);
        assert!(matches!(
            validate_metric(0, &m, 2),
            Err(Error::DimensionMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn solve_spd_reports_singular() {
        let a = DMatrix::<f64>::zeros(2, 2);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        let err = solve_spd(a, &b, 0.0, || "zeros".to_string()).unwrap_err();
        assert!(matches!(err, Error::SingularMatrix { .. }));
    }

    #[test]
    fn ridge_rescues_singular_solve() {
        let a = DMatrix::<f64>::zeros(2, 2);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = solve_spd(a, &b, 0.5, || "zeros".to_string()).unwrap();
        assert_abs_diff_eq!(x[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn invert_spd_matches_closed_form() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let inv = invert_spd(&a, || "diag".to_string()).unwrap();
        assert_abs_diff_eq!(inv[(0, 0)], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(inv[(1, 1)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn invert_spd_rejects_indefinite() {
        // Invertible, but with eigenvalues 3 and -1.
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(a.clone().try_inverse().is_some());
        let err = invert_spd(&a, || "indefinite".to_string()).unwrap_err();
        assert!(matches!(err, Error::SingularMatrix { context } if context == "indefinite"));
    }

    #[test]
    fn invert_spd_rejects_rank_deficient() {
        // Gram matrix of rows [2, 1] repeated three times: rank one.
        let a = DMatrix::from_row_slice(2, 2, &[12.0, 6.0, 6.0, 3.0]);
        assert!(matches!(
            invert_spd(&a, || "rank one".to_string()),
            Err(Error::SingularMatrix { .. })
        ));
    }
}
