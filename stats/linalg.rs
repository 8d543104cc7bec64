//! Small dense linear-algebra and descriptive helpers shared by the
//! estimators and diagnostics.

use crate::stats::estimate::EstimationError;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, InverseC, UPLO};

/// A normal matrix whose smallest eigenvalue is at or below this fraction
/// of the largest one is treated as singular.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// Eigenvalues of a PSD candidate may dip this far (relative to the largest
/// magnitude) below zero through rounding alone.
pub const PSD_TOLERANCE: f64 = 1e-10;

fn largest_magnitude(values: &Array1<f64>) -> f64 {
    values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Inverse of a symmetric positive definite matrix through its
/// eigendecomposition. Near-singular input is rejected instead of being
/// inverted into meaningless coefficients.
pub fn symmetric_inverse(matrix: &Array2<f64>) -> Result<Array2<f64>, EstimationError> {
    let (values, vectors) = matrix.eigh(UPLO::Lower)?;
    let max = largest_magnitude(&values);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    if max.is_nan() || max <= 0.0 || min <= SINGULAR_TOLERANCE * max {
        return Err(EstimationError::Singular {
            min_eigenvalue: min,
            max_eigenvalue: max,
        });
    }
    let scaled = &vectors * &values.mapv(f64::recip);
    Ok(scaled.dot(&vectors.t()))
}

/// Inverse of a positive definite matrix through its Cholesky factor.
pub fn cholesky_inverse(matrix: &Array2<f64>) -> Result<Array2<f64>, LinalgError> {
    matrix.invc()
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix restricted to its
/// positive eigenvalues. Returns the inverse and the number of eigenvalues
/// kept.
pub fn positive_pseudo_inverse(matrix: &Array2<f64>) -> Result<(Array2<f64>, usize), LinalgError> {
    let (values, vectors) = matrix.eigh(UPLO::Lower)?;
    let cutoff = SINGULAR_TOLERANCE * largest_magnitude(&values);
    let inverted = values.mapv(|v| if v > cutoff { v.recip() } else { 0.0 });
    let rank = inverted.iter().filter(|&&v| v != 0.0).count();
    let scaled = &vectors * &inverted;
    Ok((scaled.dot(&vectors.t()), rank))
}

/// Whether a symmetric matrix is positive semi-definite up to rounding.
/// A matrix whose eigendecomposition fails is reported as not PSD.
pub fn is_psd(matrix: &Array2<f64>) -> bool {
    if matrix.iter().any(|v| !v.is_finite()) {
        return false;
    }
    match matrix.eigh(UPLO::Lower) {
        Ok((values, _)) => {
            let floor = -PSD_TOLERANCE * largest_magnitude(&values).max(f64::MIN_POSITIVE);
            values.iter().all(|&v| v >= floor)
        }
        Err(_) => false,
    }
}

/// Pearson correlation of two equally long series. `NaN` when fewer than two
/// points are available or either series is constant.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let n = a.len();
    if n < 2 {
        return f64::NAN;
    }
    let mean_a = a.sum() / n as f64;
    let mean_b = b.sum() / n as f64;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return f64::NAN;
    }
    sab / (saa * sbb).sqrt()
}

/// Pearson correlation over the positions where both series are finite,
/// together with the number of such positions.
pub fn pearson_complete(a: ArrayView1<f64>, b: ArrayView1<f64>) -> (f64, usize) {
    let (left, right): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .unzip();
    let n = left.len();
    (pearson(ArrayView1::from(left.as_slice()), ArrayView1::from(right.as_slice())), n)
}

/// Mean of the finite values, `NaN` if there are none.
pub fn nan_mean<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let (sum, count) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    if count == 0 { f64::NAN } else { sum / count as f64 }
}

/// Sample variance (`ddof = 1`) of the finite values, `NaN` below two values.
pub fn nan_variance<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    let finite: Vec<f64> = values.into_iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return f64::NAN;
    }
    let mean = finite.iter().sum::<f64>() / finite.len() as f64;
    finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (finite.len() - 1) as f64
}

/// Mean of `values` within each group, where `codes[i]` is the group of row
/// `i` and groups are numbered `0..n_groups`.
pub fn group_means(values: ArrayView1<f64>, codes: &[usize], n_groups: usize) -> Array1<f64> {
    let mut sums = Array1::<f64>::zeros(n_groups);
    let mut counts = vec![0usize; n_groups];
    for (&v, &g) in values.iter().zip(codes) {
        sums[g] += v;
        counts[g] += 1;
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        *sum = if count == 0 { f64::NAN } else { *sum / count as f64 };
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn inverse_of_well_conditioned_matrix() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let inv = symmetric_inverse(&a).unwrap();
        let identity = a.dot(&inv);
        assert_abs_diff_eq!(identity[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(identity[[0, 1]], 0.0, epsilon = 1e-12);
        let chol = cholesky_inverse(&a).unwrap();
        assert_abs_diff_eq!(chol[[1, 1]], inv[[1, 1]], epsilon = 1e-12);
    }

    #[test]
    fn singular_matrix_is_rejected() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(matches!(
            symmetric_inverse(&a),
            Err(EstimationError::Singular { .. })
        ));
        let (pinv, rank) = positive_pseudo_inverse(&a).unwrap();
        assert_eq!(rank, 1);
        // the pseudo-inverse reproduces a on the range: a · a⁺ · a = a
        let back = a.dot(&pinv).dot(&a);
        assert_abs_diff_eq!(back[[1, 1]], 4.0, epsilon = 1e-10);
    }

    #[test]
    fn psd_detection() {
        assert!(is_psd(&array![[2.0, 0.0], [0.0, 0.0]]));
        assert!(!is_psd(&array![[1.0, 2.0], [2.0, 1.0]]));
    }

    #[test]
    fn correlation_helpers() {
        let a = array![1.0, 2.0, 3.0, f64::NAN];
        let b = array![2.0, 4.0, 6.5, 1.0];
        let (r, n) = pearson_complete(a.view(), b.view());
        assert_eq!(n, 3);
        assert!(r > 0.99);
        assert!(pearson(array![1.0, 1.0].view(), array![1.0, 2.0].view()).is_nan());
        assert_abs_diff_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert_abs_diff_eq!(nan_variance(&[1.0, 2.0, 3.0, f64::NAN]), 1.0);
        let means = group_means(array![1.0, 3.0, 10.0].view(), &[0, 0, 1], 2);
        assert_eq!(means, array![2.0, 10.0]);
    }
}
