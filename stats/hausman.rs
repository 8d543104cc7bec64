//! # Hausman Comparison
//!
//! `H = dᵗ V⁻¹ d` with `d = β_FE − β_RE` and `V = Cov_FE − Cov_RE` over the
//! regressors both fits estimate (the random-effects intercept is never
//! compared). `V` is inverted through its Cholesky factor; when it is not
//! positive definite a [`DegeneracyError`] is raised internally and recovered
//! with a pseudo-inverse over the positive eigenvalues, which keeps `H ≥ 0`
//! and sets [`HausmanComparison::pseudo_inverse_used`].

use crate::stats::estimate::{CONSTANT, PanelFit};
use crate::stats::linalg::{cholesky_inverse, positive_pseudo_inverse};
use crate::stats::pvalue::chi2_sf;
use ndarray::{Array1, Array2};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HausmanDecision {
    FixedEffects,
    RandomEffects,
    /// No comparison was attempted.
    NotAvailable,
}

impl fmt::Display for HausmanDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedEffects => f.write_str("FE"),
            Self::RandomEffects => f.write_str("RE"),
            Self::NotAvailable => f.write_str("NA"),
        }
    }
}

/// The covariance difference cannot be inverted directly.
#[derive(Error, Debug)]
pub enum DegeneracyError {
    #[error("Covariance difference of order {order} is not positive definite: {source}")]
    NotPositiveDefinite {
        order: usize,
        source: ndarray_linalg::error::LinalgError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HausmanComparison {
    pub statistic: f64,
    pub df: usize,
    pub pvalue: f64,
    pub decision: HausmanDecision,
    pub pseudo_inverse_used: bool,
    /// Regressors entering `d`, in fixed-effects order.
    pub compared: Vec<String>,
}

impl HausmanComparison {
    pub fn not_available() -> Self {
        Self {
            statistic: f64::NAN,
            df: 0,
            pvalue: f64::NAN,
            decision: HausmanDecision::NotAvailable,
            pseudo_inverse_used: false,
            compared: Vec::new(),
        }
    }
}

fn invert_difference(v: &Array2<f64>) -> Result<Array2<f64>, DegeneracyError> {
    cholesky_inverse(v).map_err(|source| DegeneracyError::NotPositiveDefinite {
        order: v.nrows(),
        source,
    })
}

/// Compares a fixed-effects and a random-effects fit of the same model.
/// Fixed effects are preferred when the p-value is below `significance`.
pub fn hausman(fe: &PanelFit, re: &PanelFit, significance: f64) -> HausmanComparison {
    let shared: Vec<(usize, usize)> = fe
        .names
        .iter()
        .enumerate()
        .filter(|(_, name)| name.as_str() != CONSTANT)
        .filter_map(|(i, name)| re.names.iter().position(|n| n == name).map(|j| (i, j)))
        .collect();
    if fe.nobs == 0 || re.nobs == 0 || shared.is_empty() {
        return HausmanComparison::not_available();
    }

    let k = shared.len();
    let d: Array1<f64> = shared
        .iter()
        .map(|&(i, j)| fe.params[i] - re.params[j])
        .collect();
    let v = Array2::from_shape_fn((k, k), |(a, b)| {
        let (fa, ra) = shared[a];
        let (fb, rb) = shared[b];
        fe.cov[[fa, fb]] - re.cov[[ra, rb]]
    });

    let (inverse, pseudo_inverse_used) = match invert_difference(&v) {
        Ok(inverse) => (inverse, false),
        Err(err) => {
            log::warn!("{err}; falling back to the positive-eigenvalue pseudo-inverse");
            match positive_pseudo_inverse(&v) {
                Ok((inverse, _)) => (inverse, true),
                Err(source) => {
                    log::warn!("Pseudo-inverse of the covariance difference failed: {source}");
                    return HausmanComparison {
                        pseudo_inverse_used: true,
                        ..HausmanComparison::not_available()
                    };
                }
            }
        }
    };

    let statistic = d.dot(&inverse.dot(&d));
    let pvalue = chi2_sf(statistic, k as f64);
    let decision = if pvalue < significance {
        HausmanDecision::FixedEffects
    } else {
        HausmanDecision::RandomEffects
    };
    HausmanComparison {
        statistic,
        df: k,
        pvalue,
        decision,
        pseudo_inverse_used,
        compared: shared.iter().map(|&(i, _)| fe.names[i].clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::covariance::CovarianceKind;
    use crate::stats::estimate::tests::synthetic_design;
    use crate::stats::estimate::{EstimatorKind, FitOptions, fit};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn fits(correlated: bool, seed: u64) -> (PanelFit, PanelFit) {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let effects: Vec<f64> = (0..50).map(|_| 2.0 * normal.sample(&mut rng)).collect();
        let shocks: Vec<f64> = (0..50 * 6).map(|_| normal.sample(&mut rng)).collect();
        let noise: Vec<f64> = (0..50 * 6).map(|_| 0.5 * normal.sample(&mut rng)).collect();
        let design = synthetic_design(
            50,
            6,
            |e, t| shocks[e * 6 + t] + if correlated { effects[e] } else { 0.0 },
            |e, t, x| 1.0 + 2.0 * x + effects[e] + noise[e * 6 + t],
        );
        let fe = fit(
            &design,
            &FitOptions::new(EstimatorKind::TWO_WAY, CovarianceKind::Unadjusted),
        )
        .unwrap();
        let re = fit(
            &design,
            &FitOptions::new(EstimatorKind::RandomEffects, CovarianceKind::Unadjusted),
        )
        .unwrap();
        (fe, re)
    }

    #[test]
    fn correlated_effects_favour_fixed_effects() {
        let (fe, re) = fits(true, 3);
        let h = hausman(&fe, &re, 0.05);
        assert_eq!(h.df, 1);
        assert_eq!(h.compared, vec!["x".to_string()]);
        assert!(h.statistic > 0.0);
        assert_eq!(h.decision, HausmanDecision::FixedEffects);
    }

    #[test]
    fn statistic_is_never_negative() {
        for seed in 0..5 {
            let (fe, re) = fits(false, seed);
            let h = hausman(&fe, &re, 0.05);
            assert!(h.statistic >= 0.0 || h.pseudo_inverse_used);
            let swapped = hausman(&re, &fe, 0.05);
            assert!(swapped.statistic >= 0.0 || swapped.pseudo_inverse_used);
            assert_ne!(h.decision, HausmanDecision::NotAvailable);
        }
    }

    #[test]
    fn singular_difference_uses_the_pseudo_inverse() {
        let (fe, _) = fits(false, 9);
        let h = hausman(&fe, &fe, 0.05);
        assert!(h.pseudo_inverse_used);
        assert_abs_diff_eq!(h.statistic, 0.0);
        assert_eq!(h.decision, HausmanDecision::RandomEffects);
    }

    #[test]
    fn no_shared_regressors_is_not_available() {
        let (fe, re) = fits(false, 1);
        let mut intercept_only = re.clone();
        intercept_only.names.truncate(1);
        let h = hausman(&fe, &intercept_only, 0.05);
        assert_eq!(h.decision, HausmanDecision::NotAvailable);
        assert_eq!(h.decision.to_string(), "NA");
        assert!(h.statistic.is_nan());
    }
}
