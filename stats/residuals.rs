//! # Residual Diagnostics
//!
//! Three independent checks on a fitted model's residuals, each returning a
//! [`DiagnosticStatistic`]. A check whose preconditions are not met reports
//! itself as not computed (missing statistic and p-value) instead of failing.

use crate::lag::{LagMode, lag_within_groups};
use crate::stats::design::DesignMatrix;
use crate::stats::linalg::{nan_mean, nan_variance, pearson_complete};
use crate::stats::pvalue::{chi2_sf, normal_two_sided};
use ndarray::{Array1, Array2, Axis, s};
use std::ops::Range;

/// Residuals indexed by (entity, time), sorted by entity then time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualSeries {
    values: Array1<f64>,
    entity: Vec<usize>,
    time: Vec<usize>,
    periods: Vec<i64>,
    groups: Vec<Range<usize>>,
}

impl ResidualSeries {
    /// Attaches `values` to the rows of `design`.
    pub fn from_design(design: &DesignMatrix, values: Array1<f64>) -> Self {
        debug_assert_eq!(values.len(), design.nobs());
        Self {
            values,
            entity: design.entity_codes().to_vec(),
            time: design.time_codes().to_vec(),
            periods: design.periods().to_vec(),
            groups: design.groups().to_vec(),
        }
    }

    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn n_entities(&self) -> usize {
        self.groups.len()
    }

    pub fn n_periods(&self) -> usize {
        self.periods.len()
    }

    /// Time × entity matrix of residuals; cells without an observation are
    /// `NaN`.
    pub fn pivot(&self) -> Array2<f64> {
        let mut matrix = Array2::from_elem((self.n_periods(), self.n_entities()), f64::NAN);
        for ((&value, &e), &t) in self.values.iter().zip(&self.entity).zip(&self.time) {
            matrix[[t, e]] = value;
        }
        matrix
    }

    fn calendar(&self) -> Vec<i64> {
        self.time.iter().map(|&t| self.periods[t]).collect()
    }
}

/// Name, statistic, degrees of freedom (or sample size) and p-value of one
/// diagnostic test.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticStatistic {
    pub test: &'static str,
    pub statistic: f64,
    pub df: f64,
    pub pvalue: f64,
}

impl DiagnosticStatistic {
    fn not_computed(test: &'static str) -> Self {
        Self {
            test,
            statistic: f64::NAN,
            df: f64::NAN,
            pvalue: f64::NAN,
        }
    }

    pub fn is_computed(&self) -> bool {
        self.statistic.is_finite()
    }
}

/// Pooled first-order serial correlation.
///
/// Each entity's residuals are lagged by one row position, the aligned
/// non-missing pairs from all entities are pooled, and the statistic is
/// `n · r²` against a chi-square with one degree of freedom. `df` carries
/// the number of pairs.
pub fn serial_correlation(residuals: &ResidualSeries) -> DiagnosticStatistic {
    const TEST: &str = "Wooldridge AR(1)";
    let times = residuals.calendar();
    let lagged = lag_within_groups(
        residuals.values.view(),
        &times,
        &residuals.groups,
        1,
        LagMode::Positional,
    );
    let (rho, pairs) = pearson_complete(residuals.values.view(), lagged.view());
    if pairs < 2 || !rho.is_finite() {
        return DiagnosticStatistic::not_computed(TEST);
    }
    let statistic = pairs as f64 * rho * rho;
    DiagnosticStatistic {
        test: TEST,
        statistic,
        df: pairs as f64,
        pvalue: chi2_sf(statistic, 1.0),
    }
}

/// Pesaran's cross-sectional dependence statistic.
///
/// Residuals are pivoted to time × entity, all-missing rows and columns are
/// removed, and the matrix is demeaned by entity then by time. With `r̄` the
/// mean of the pairwise-complete correlations above the diagonal,
/// `CD = √T · r̄ · √(N(N−1)/2)`, two-sided against a standard normal. Needs
/// at least three periods and two entities.
pub fn cross_sectional_dependence(residuals: &ResidualSeries) -> DiagnosticStatistic {
    const TEST: &str = "Pesaran CD";
    let pivot = residuals.pivot();
    let rows: Vec<usize> = (0..pivot.nrows())
        .filter(|&t| pivot.row(t).iter().any(|v| v.is_finite()))
        .collect();
    let cols: Vec<usize> = (0..pivot.ncols())
        .filter(|&e| pivot.column(e).iter().any(|v| v.is_finite()))
        .collect();
    let mut matrix = pivot.select(Axis(0), &rows).select(Axis(1), &cols);
    let (periods, entities) = matrix.dim();
    if periods < 3 || entities < 2 {
        return DiagnosticStatistic::not_computed(TEST);
    }

    for mut column in matrix.axis_iter_mut(Axis(1)) {
        let mean = nan_mean(column.iter());
        column.mapv_inplace(|v| v - mean);
    }
    for mut row in matrix.axis_iter_mut(Axis(0)) {
        let mean = nan_mean(row.iter());
        row.mapv_inplace(|v| v - mean);
    }

    let mut correlations = Vec::with_capacity(entities * (entities - 1) / 2);
    for i in 0..entities {
        for j in (i + 1)..entities {
            correlations.push(pearson_complete(matrix.column(i), matrix.column(j)).0);
        }
    }
    let r_bar = nan_mean(&correlations);
    if !r_bar.is_finite() {
        return DiagnosticStatistic::not_computed(TEST);
    }
    let n = entities as f64;
    let statistic = (periods as f64).sqrt() * r_bar * (n * (n - 1.0) / 2.0).sqrt();
    DiagnosticStatistic {
        test: TEST,
        statistic,
        df: entities as f64,
        pvalue: normal_two_sided(statistic),
    }
}

/// Groupwise heteroskedasticity proxy.
///
/// With `vᵢ` the sample variance of entity `i`'s residuals, the statistic is
/// `Var(v) / Mean(v)² · G` against a chi-square with one degree of freedom.
/// Needs at least three entities with a variance and a positive mean
/// variance.
pub fn groupwise_heteroskedasticity(residuals: &ResidualSeries) -> DiagnosticStatistic {
    const TEST: &str = "Groupwise heteroskedasticity";
    let variances: Vec<f64> = residuals
        .groups
        .iter()
        .map(|group| nan_variance(residuals.values.slice(s![group.clone()]).iter()))
        .filter(|v| v.is_finite())
        .collect();
    let mean = nan_mean(&variances);
    if variances.len() < 3 || mean.is_nan() || mean <= 0.0 {
        return DiagnosticStatistic::not_computed(TEST);
    }
    let statistic = nan_variance(&variances) / (mean * mean) * variances.len() as f64;
    DiagnosticStatistic {
        test: TEST,
        statistic,
        df: variances.len() as f64,
        pvalue: chi2_sf(statistic, 1.0),
    }
}

/// The three diagnostics of one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualDiagnostics {
    pub serial: DiagnosticStatistic,
    pub cross_section: DiagnosticStatistic,
    pub heteroskedasticity: DiagnosticStatistic,
}

pub fn diagnose(residuals: &ResidualSeries) -> ResidualDiagnostics {
    ResidualDiagnostics {
        serial: serial_correlation(residuals),
        cross_section: cross_sectional_dependence(residuals),
        heteroskedasticity: groupwise_heteroskedasticity(residuals),
    }
}
