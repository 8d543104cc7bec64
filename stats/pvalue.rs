//! Tail probabilities used by every test statistic in the crate.
//!
//! A distribution that cannot be constructed (non-positive degrees of
//! freedom) or a `NaN` statistic yields `NaN`, reported as a missing p-value.
//! An infinite statistic has a p-value of zero.

use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor, Normal, StudentsT};

fn tail(statistic: f64, probability: impl FnOnce(f64) -> Option<f64>) -> f64 {
    if statistic.is_nan() {
        f64::NAN
    } else if statistic.is_infinite() {
        0.0
    } else {
        probability(statistic).unwrap_or(f64::NAN)
    }
}

/// Upper tail of a chi-square distribution with `df` degrees of freedom.
pub fn chi2_sf(statistic: f64, df: f64) -> f64 {
    tail(statistic, |s| ChiSquared::new(df).map(|dist| dist.sf(s.max(0.0))).ok())
}

/// Two-sided p-value of a standard normal statistic.
pub fn normal_two_sided(statistic: f64) -> f64 {
    tail(statistic, |s| Normal::new(0.0, 1.0).map(|dist| 2.0 * dist.sf(s.abs())).ok())
}

/// Two-sided p-value of a Student t statistic.
pub fn t_two_sided(statistic: f64, df: f64) -> f64 {
    tail(statistic, |s| {
        StudentsT::new(0.0, 1.0, df)
            .map(|dist| 2.0 * dist.sf(s.abs()))
            .ok()
    })
}

/// Upper tail of an F distribution.
pub fn f_sf(statistic: f64, df_num: f64, df_den: f64) -> f64 {
    tail(statistic, |s| {
        FisherSnedecor::new(df_num, df_den)
            .map(|dist| dist.sf(s.max(0.0)))
            .ok()
    })
}
