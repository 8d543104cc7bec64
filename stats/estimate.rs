//! # Fixed- and Random-Effects Estimation
//!
//! Both estimators reduce to ordinary least squares in a transformed space:
//!
//! - Fixed effects subtract entity and/or period means from the
//!   dependent variable and every regressor. With both effects the means are
//!   removed alternately until the transformed data stop changing, which is
//!   exact after one sweep on a balanced panel and converges otherwise.
//!   Regressors left without within variation are absorbed (dropped and
//!   listed on the result) rather than making the normal matrix singular.
//! - Random effects quasi-demean by entity with the Swamy–Arora weights
//!   `θᵢ = 1 − √(σ²_e / (Tᵢ σ²_u + σ²_e))` and include an intercept. When
//!   the entity variance component cannot be estimated the weights are zero,
//!   the fit is pooled OLS, and [`VarianceComponents::pooled_fallback`] says
//!   so.
//!
//! Residuals handed to the diagnostics are the composite `y − Xβ` on the
//! untransformed data; the residuals of the transformed regression are kept
//! as [`PanelFit::idiosyncratic`].

use crate::stats::covariance::{CovarianceInputs, CovarianceKind, estimate_covariance};
use crate::stats::design::DesignMatrix;
use crate::stats::linalg::{group_means, pearson, symmetric_inverse};
use crate::stats::pvalue::{f_sf, normal_two_sided, t_two_sided};
use crate::stats::residuals::ResidualSeries;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis, s};
use ndarray_linalg::error::LinalgError;
use std::fmt;
use thiserror::Error;

/// Name of the random-effects intercept.
pub const CONSTANT: &str = "const";

/// A regressor whose within sum of squares falls below this fraction of its
/// centred sum of squares is absorbed by the effects.
const ABSORPTION_TOLERANCE: f64 = 1e-8;
const DEMEAN_TOLERANCE: f64 = 1e-10;
const MAX_DEMEAN_SWEEPS: usize = 1000;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("The design has no usable observations.")]
    EmptyDesign,

    #[error("No usable regressors remain after dropping absorbed or constant columns.")]
    NoRegressors,

    #[error(
        "The normal matrix is singular: smallest eigenvalue {min_eigenvalue:.3e}, largest {max_eigenvalue:.3e}."
    )]
    Singular {
        min_eigenvalue: f64,
        max_eigenvalue: f64,
    },

    #[error("{singletons} clusters contain a single observation; clustered errors need at least two per cluster.")]
    SingletonCluster { singletons: usize },

    #[error("No residual degrees of freedom: {nobs} observations for {parameters} parameters.")]
    NoResidualDf { nobs: usize, parameters: usize },

    #[error("At least two regressors are required, found {0}.")]
    TooFewColumns(usize),

    #[error("Linear algebra routine failed: {0}")]
    Linalg(#[from] LinalgError),
}

impl EstimationError {
    /// Stable identifier written into skip reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyDesign => "empty_design",
            Self::NoRegressors => "no_regressors",
            Self::Singular { .. } => "singular_matrix",
            Self::SingletonCluster { .. } => "singleton_cluster",
            Self::NoResidualDf { .. } => "no_residual_df",
            Self::TooFewColumns(_) => "too_few_columns",
            Self::Linalg(_) => "linear_algebra",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    FixedEffects {
        entity_effects: bool,
        time_effects: bool,
    },
    RandomEffects,
}

impl EstimatorKind {
    /// Entity and time effects.
    pub const TWO_WAY: Self = Self::FixedEffects {
        entity_effects: true,
        time_effects: true,
    };
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedEffects {
                entity_effects: true,
                time_effects: true,
            } => f.write_str("FE (entity + time)"),
            Self::FixedEffects {
                entity_effects: true,
                time_effects: false,
            } => f.write_str("FE (entity)"),
            Self::FixedEffects {
                entity_effects: false,
                time_effects: true,
            } => f.write_str("FE (time)"),
            Self::FixedEffects { .. } => f.write_str("Pooled OLS"),
            Self::RandomEffects => f.write_str("RE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub estimator: EstimatorKind,
    pub covariance: CovarianceKind,
    /// Student t p-values and small-sample scaling of clustered covariances.
    pub small_sample: bool,
}

impl FitOptions {
    pub fn new(estimator: EstimatorKind, covariance: CovarianceKind) -> Self {
        Self {
            estimator,
            covariance,
            small_sample: false,
        }
    }

    pub fn with_small_sample(self, small_sample: bool) -> Self {
        Self {
            small_sample,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RSquared {
    /// In the estimator's own within space.
    pub within: f64,
    /// Squared correlation of entity means of `y` and `Xβ`.
    pub between: f64,
    /// Squared correlation of `y` and `Xβ`.
    pub overall: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FStatistic {
    pub statistic: f64,
    pub df_num: usize,
    pub df_den: usize,
    pub pvalue: f64,
}

/// Swamy–Arora variance components of a random-effects fit.
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceComponents {
    pub sigma2_e: f64,
    pub sigma2_u: f64,
    /// Quasi-demeaning weight of every entity.
    pub theta: Array1<f64>,
    /// The entity component could not be estimated and the fit is pooled OLS.
    pub pooled_fallback: bool,
}

/// An immutable fitted model.
#[derive(Debug, Clone)]
pub struct PanelFit {
    pub estimator: EstimatorKind,
    pub covariance_kind: CovarianceKind,
    pub dependent: String,
    /// Names of the estimated coefficients, in order.
    pub names: Vec<String>,
    pub params: Array1<f64>,
    pub cov: Array2<f64>,
    pub std_errors: Array1<f64>,
    pub tstats: Array1<f64>,
    pub pvalues: Array1<f64>,
    pub rsquared: RSquared,
    pub f_stat: FStatistic,
    /// Composite residuals `y − Xβ`.
    pub residuals: ResidualSeries,
    pub idiosyncratic: ResidualSeries,
    pub nobs: usize,
    pub n_entities: usize,
    pub n_periods: usize,
    pub df_resid: usize,
    /// Regressors dropped because the transformation removed them.
    pub absorbed: Vec<String>,
    pub covariance_psd: bool,
    pub variance: Option<VarianceComponents>,
}

impl PanelFit {
    fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn param(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.params[i])
    }

    pub fn pvalue(&self, name: &str) -> Option<f64> {
        self.position(name).map(|i| self.pvalues[i])
    }

    /// Covariance of two named coefficients.
    pub fn covariance(&self, a: &str, b: &str) -> Option<f64> {
        Some(self.cov[[self.position(a)?, self.position(b)?]])
    }
}

/// Fits `design` with the requested estimator and covariance.
pub fn fit(design: &DesignMatrix, options: &FitOptions) -> Result<PanelFit, EstimationError> {
    if design.nobs() == 0 {
        return Err(EstimationError::EmptyDesign);
    }
    if design.n_regressors() == 0 {
        return Err(EstimationError::NoRegressors);
    }
    match options.estimator {
        EstimatorKind::FixedEffects {
            entity_effects,
            time_effects,
        } => fit_fixed_effects(design, options, entity_effects, time_effects),
        EstimatorKind::RandomEffects => fit_random_effects(design, options),
    }
}

struct Ols {
    params: Array1<f64>,
    bread: Array2<f64>,
    resid: Array1<f64>,
}

/// Least squares on columns rescaled to unit length, so the singularity
/// test on `XᵗX` does not depend on the units of the regressors.
fn ols(x: &Array2<f64>, y: &Array1<f64>) -> Result<Ols, EstimationError> {
    let norms = x
        .map_axis(Axis(0), |column| column.dot(&column).sqrt())
        .mapv(|norm| if norm > 0.0 { norm } else { 1.0 });
    let scaled = x / &norms;
    let inner = symmetric_inverse(&scaled.t().dot(&scaled))?;
    let params = inner.dot(&scaled.t().dot(y)) / &norms;
    let bread = Array2::from_shape_fn(inner.dim(), |(i, j)| inner[[i, j]] / (norms[i] * norms[j]));
    let resid = y - &x.dot(&params);
    Ok(Ols {
        params,
        bread,
        resid,
    })
}

fn sum_of_squares<'a>(values: impl IntoIterator<Item = &'a f64>) -> f64 {
    values.into_iter().map(|v| v * v).sum()
}

/// Removes group means from `column` in place. Returns the largest absolute
/// mean removed.
fn remove_group_means(mut column: ArrayViewMut1<f64>, codes: &[usize], n_groups: usize) -> f64 {
    let means = group_means(column.view(), codes, n_groups);
    for (value, &g) in column.iter_mut().zip(codes) {
        *value -= means[g];
    }
    means.iter().fold(0.0_f64, |acc, m| acc.max(m.abs()))
}

/// Alternates entity and time demeaning of one column until a sweep moves
/// it by less than [`DEMEAN_TOLERANCE`] times its own largest magnitude.
/// Returns the number of sweeps, or `None` when the sweep limit was hit.
fn demean_two_way(mut column: ArrayViewMut1<f64>, design: &DesignMatrix) -> Option<usize> {
    let scale = column.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tolerance = DEMEAN_TOLERANCE * scale;
    for sweep in 0..MAX_DEMEAN_SWEEPS {
        let moved = remove_group_means(column.view_mut(), design.entity_codes(), design.n_entities())
            .max(remove_group_means(
                column.view_mut(),
                design.time_codes(),
                design.n_periods(),
            ));
        if moved <= tolerance {
            return Some(sweep + 1);
        }
    }
    None
}

/// Within transformation for the requested effects, column by column.
fn demean(
    data: &mut Array2<f64>,
    design: &DesignMatrix,
    entity_effects: bool,
    time_effects: bool,
) {
    for (index, column) in data.axis_iter_mut(Axis(1)).enumerate() {
        match (entity_effects, time_effects) {
            (false, false) => {}
            (true, false) => {
                remove_group_means(column, design.entity_codes(), design.n_entities());
            }
            (false, true) => {
                remove_group_means(column, design.time_codes(), design.n_periods());
            }
            (true, true) => match demean_two_way(column, design) {
                Some(sweeps) => {
                    log::debug!("Two-way demeaning of column {index} converged after {sweeps} sweeps")
                }
                None => log::warn!(
                    "Two-way demeaning of column {index} stopped after {MAX_DEMEAN_SWEEPS} sweeps without converging"
                ),
            },
        }
    }
}

fn centred_sum_of_squares(column: ArrayView1<f64>) -> f64 {
    let mean = column.mean().unwrap_or(0.0);
    column.iter().map(|v| (v - mean).powi(2)).sum()
}

fn fit_fixed_effects(
    design: &DesignMatrix,
    options: &FitOptions,
    entity_effects: bool,
    time_effects: bool,
) -> Result<PanelFit, EstimationError> {
    let n = design.nobs();
    let k = design.n_regressors();
    let mut stacked = Array2::<f64>::zeros((n, k + 1));
    stacked.column_mut(0).assign(design.y());
    stacked.slice_mut(s![.., 1..]).assign(design.x());
    demean(&mut stacked, design, entity_effects, time_effects);

    let mut keep = Vec::with_capacity(k);
    let mut absorbed = Vec::new();
    for j in 0..k {
        let raw = design.x().column(j);
        let centred = centred_sum_of_squares(raw);
        let reference = if centred > 0.0 { centred } else { sum_of_squares(raw) };
        let within = sum_of_squares(stacked.column(j + 1));
        if within <= ABSORPTION_TOLERANCE * reference {
            absorbed.push(design.regressors()[j].clone());
        } else {
            keep.push(j);
        }
    }
    if !absorbed.is_empty() {
        log::info!(
            "Absorbed regressors dropped from the {} model: {}",
            design.dependent(),
            absorbed.join(", ")
        );
    }
    if keep.is_empty() {
        return Err(EstimationError::NoRegressors);
    }

    let effects_df = match (entity_effects, time_effects) {
        (false, false) => 0,
        (true, false) => design.n_entities(),
        (false, true) => design.n_periods(),
        (true, true) => (design.n_entities() - 1) + (design.n_periods() - 1) + 1,
    };
    let parameters = keep.len() + effects_df;
    if n <= parameters {
        return Err(EstimationError::NoResidualDf {
            nobs: n,
            parameters,
        });
    }
    let df_resid = n - parameters;

    let y_within = stacked.column(0).to_owned();
    let x_within = stacked.slice(s![.., 1..]).select(Axis(1), &keep);
    let regression = ols(&x_within, &y_within)?;

    let tss = sum_of_squares(&y_within);
    let r2_within = if tss > 0.0 {
        1.0 - sum_of_squares(&regression.resid) / tss
    } else {
        f64::NAN
    };
    let fitted = design.x().select(Axis(1), &keep).dot(&regression.params);
    let names = keep.iter().map(|&j| design.regressors()[j].clone()).collect();

    finish(
        design,
        options,
        Transformed {
            names,
            x: x_within,
            regression,
            df_resid,
            slopes: keep.len(),
            r2_within,
            r2_model: r2_within,
            fitted,
            absorbed,
            variance: None,
        },
    )
}

fn fit_random_effects(
    design: &DesignMatrix,
    options: &FitOptions,
) -> Result<PanelFit, EstimationError> {
    let n = design.nobs();
    let codes = design.entity_codes();
    let n_entities = design.n_entities();

    let mut keep = Vec::new();
    let mut absorbed = Vec::new();
    for (j, column) in design.x().axis_iter(Axis(1)).enumerate() {
        if centred_sum_of_squares(column) > ABSORPTION_TOLERANCE * sum_of_squares(column) {
            keep.push(j);
        } else {
            absorbed.push(design.regressors()[j].clone());
        }
    }
    if !absorbed.is_empty() {
        log::info!(
            "Regressors collinear with the intercept dropped from the {} model: {}",
            design.dependent(),
            absorbed.join(", ")
        );
    }
    if keep.is_empty() {
        return Err(EstimationError::NoRegressors);
    }
    let x = design.x().select(Axis(1), &keep);
    let y = design.y();
    let k = keep.len();
    if n <= k + 1 {
        return Err(EstimationError::NoResidualDf {
            nobs: n,
            parameters: k + 1,
        });
    }

    let y_bar = group_means(y.view(), codes, n_entities);
    let mut x_bar = Array2::<f64>::zeros((n_entities, k));
    for (j, column) in x.axis_iter(Axis(1)).enumerate() {
        x_bar
            .column_mut(j)
            .assign(&group_means(column, codes, n_entities));
    }
    let y_within: Array1<f64> = y
        .iter()
        .zip(codes)
        .map(|(&v, &g)| v - y_bar[g])
        .collect();
    let x_within = Array2::from_shape_fn((n, k), |(i, j)| x[[i, j]] - x_bar[[codes[i], j]]);

    let variance = variance_components(design, &y_within, &x_within, &y_bar, &x_bar)?;

    let mut x_star = Array2::<f64>::zeros((n, k + 1));
    let mut y_star = Array1::<f64>::zeros(n);
    for i in 0..n {
        let g = codes[i];
        let theta = variance.theta[g];
        x_star[[i, 0]] = 1.0 - theta;
        for j in 0..k {
            x_star[[i, j + 1]] = x[[i, j]] - theta * x_bar[[g, j]];
        }
        y_star[i] = y[i] - theta * y_bar[g];
    }
    let regression = ols(&x_star, &y_star)?;

    let slopes = regression.params.slice(s![1..]).to_owned();
    let within_tss = sum_of_squares(&y_within);
    let r2_within = if within_tss > 0.0 {
        let within_resid = &y_within - &x_within.dot(&slopes);
        1.0 - sum_of_squares(&within_resid) / within_tss
    } else {
        f64::NAN
    };
    let star_tss = centred_sum_of_squares(y_star.view());
    let r2_model = if star_tss > 0.0 {
        1.0 - sum_of_squares(&regression.resid) / star_tss
    } else {
        f64::NAN
    };
    let fitted = x.dot(&slopes) + regression.params[0];

    let mut names = vec![CONSTANT.to_string()];
    names.extend(keep.iter().map(|&j| design.regressors()[j].clone()));

    finish(
        design,
        options,
        Transformed {
            names,
            x: x_star,
            regression,
            df_resid: n - (k + 1),
            slopes: k,
            r2_within,
            r2_model,
            fitted,
            absorbed,
            variance: Some(variance),
        },
    )
}

/// Swamy–Arora variance components, or the pooled fallback.
fn variance_components(
    design: &DesignMatrix,
    y_within: &Array1<f64>,
    x_within: &Array2<f64>,
    y_bar: &Array1<f64>,
    x_bar: &Array2<f64>,
) -> Result<VarianceComponents, EstimationError> {
    let n = design.nobs();
    let n_entities = design.n_entities();
    let k = x_bar.ncols();

    // Regressors without within variation carry no information about σ²_e.
    let varying: Vec<usize> = (0..k)
        .filter(|&j| {
            let centred = centred_sum_of_squares(x_bar.column(j)).max(f64::MIN_POSITIVE);
            sum_of_squares(x_within.column(j)) > ABSORPTION_TOLERANCE * centred
        })
        .collect();
    let ssr_within = if varying.is_empty() {
        sum_of_squares(y_within)
    } else {
        sum_of_squares(&ols(&x_within.select(Axis(1), &varying), y_within)?.resid)
    };
    let df_within = n as isize - n_entities as isize - varying.len() as isize;
    let df_between = n_entities as isize - k as isize - 1;

    let fallback = |reason: &str, sigma2_e: f64| {
        log::warn!(
            "Random-effects entity variance could not be estimated for {} ({reason}); using pooled OLS",
            design.dependent()
        );
        VarianceComponents {
            sigma2_e,
            sigma2_u: 0.0,
            theta: Array1::zeros(n_entities),
            pooled_fallback: true,
        }
    };

    if df_within <= 0 {
        return Ok(fallback("no within degrees of freedom", f64::NAN));
    }
    let sigma2_e = ssr_within / df_within as f64;
    if df_between <= 0 {
        return Ok(fallback("too few entities for the between regression", sigma2_e));
    }

    let mut between_x = Array2::<f64>::ones((n_entities, k + 1));
    between_x.slice_mut(s![.., 1..]).assign(x_bar);
    let ssr_between = match ols(&between_x, y_bar) {
        Ok(between) => sum_of_squares(&between.resid),
        Err(EstimationError::Singular { .. }) => {
            return Ok(fallback("singular between regression", sigma2_e));
        }
        Err(other) => return Err(other),
    };
    let sigma2_b = ssr_between / df_between as f64;

    let sizes: Vec<f64> = design.groups().iter().map(|g| g.len() as f64).collect();
    let harmonic = n_entities as f64 / sizes.iter().map(|t| t.recip()).sum::<f64>();
    let sigma2_u = sigma2_b - sigma2_e / harmonic;
    if sigma2_u.is_nan() || sigma2_u <= 0.0 {
        return Ok(fallback("non-positive entity variance", sigma2_e));
    }

    let theta = sizes
        .iter()
        .map(|&t| 1.0 - (sigma2_e / (t * sigma2_u + sigma2_e)).sqrt())
        .collect();
    Ok(VarianceComponents {
        sigma2_e,
        sigma2_u,
        theta,
        pooled_fallback: false,
    })
}

/// A solved regression in its transformed space, ready for inference.
struct Transformed {
    names: Vec<String>,
    x: Array2<f64>,
    regression: Ols,
    df_resid: usize,
    /// Number of coefficients other than an intercept.
    slopes: usize,
    r2_within: f64,
    /// R² used by the model F-test.
    r2_model: f64,
    /// `Xβ` on the untransformed regressors.
    fitted: Array1<f64>,
    absorbed: Vec<String>,
    variance: Option<VarianceComponents>,
}

fn finish(
    design: &DesignMatrix,
    options: &FitOptions,
    model: Transformed,
) -> Result<PanelFit, EstimationError> {
    let covariance = estimate_covariance(
        options.covariance,
        &CovarianceInputs {
            x: model.x.view(),
            resid: model.regression.resid.view(),
            bread: &model.regression.bread,
            entity: design.entity_codes(),
            time: design.time_codes(),
            df_resid: model.df_resid,
            small_sample: options.small_sample,
        },
    )?;

    let params = model.regression.params;
    let std_errors = covariance.matrix.diag().mapv(|v| v.max(0.0).sqrt());
    let tstats = &params / &std_errors;
    let pvalues = tstats.mapv(|t| {
        if options.small_sample {
            t_two_sided(t, model.df_resid as f64)
        } else {
            normal_two_sided(t)
        }
    });

    let y = design.y();
    let codes = design.entity_codes();
    let n_entities = design.n_entities();
    let between = pearson(
        group_means(y.view(), codes, n_entities).view(),
        group_means(model.fitted.view(), codes, n_entities).view(),
    );
    let overall = pearson(y.view(), model.fitted.view());

    let f_value = (model.r2_model / model.slopes as f64)
        / ((1.0 - model.r2_model) / model.df_resid as f64);
    let f_stat = FStatistic {
        statistic: f_value,
        df_num: model.slopes,
        df_den: model.df_resid,
        pvalue: f_sf(f_value, model.slopes as f64, model.df_resid as f64),
    };

    let composite = y - &model.fitted;
    Ok(PanelFit {
        estimator: options.estimator,
        covariance_kind: options.covariance,
        dependent: design.dependent().to_string(),
        names: model.names,
        params,
        cov: covariance.matrix,
        std_errors,
        tstats,
        pvalues,
        rsquared: RSquared {
            within: model.r2_within,
            between: between * between,
            overall: overall * overall,
        },
        f_stat,
        residuals: ResidualSeries::from_design(design, composite),
        idiosyncratic: ResidualSeries::from_design(design, model.regression.resid),
        nobs: design.nobs(),
        n_entities,
        n_periods: design.n_periods(),
        df_resid: model.df_resid,
        absorbed: model.absorbed,
        covariance_psd: covariance.psd,
        variance: model.variance,
    })
}
