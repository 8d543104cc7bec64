//! # Coefficient Covariance
//!
//! All robust estimators share the sandwich form `B · M · B`, where the bread
//! `B = (XᵗX)⁻¹` comes from the fitted regression in its transformed space
//! and the meat `M` is built from per-cluster score sums `s_g = Σ xᵢ eᵢ`.
//!
//! Two-way clustering follows Cameron, Gelbach and Miller:
//! `V = V_entity + V_time − V_het`. The sum can fail to be positive
//! semi-definite in small samples; that is reported on the estimate and in
//! the log, and the matrix is left as computed.

use crate::stats::estimate::EstimationError;
use crate::stats::linalg::is_psd;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which index levels define the clusters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterBy {
    Entity,
    Time,
    EntityTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceKind {
    /// Homoskedastic: `s² · (XᵗX)⁻¹` with `s² = SSR / df_resid`.
    Unadjusted,
    /// White heteroskedasticity-robust (HC0).
    Robust,
    Clustered(ClusterBy),
}

impl fmt::Display for CovarianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unadjusted => f.write_str("unadjusted"),
            Self::Robust => f.write_str("robust"),
            Self::Clustered(ClusterBy::Entity) => f.write_str("entity"),
            Self::Clustered(ClusterBy::Time) => f.write_str("year"),
            Self::Clustered(ClusterBy::EntityTime) => f.write_str("entity+year"),
        }
    }
}

/// Everything the covariance estimators need from a fitted regression.
#[derive(Debug, Clone, Copy)]
pub struct CovarianceInputs<'a> {
    /// Regressors in the space the coefficients were estimated in.
    pub x: ArrayView2<'a, f64>,
    /// Residuals in the same space.
    pub resid: ArrayView1<'a, f64>,
    /// `(XᵗX)⁻¹`.
    pub bread: &'a Array2<f64>,
    /// Dense entity code of every row.
    pub entity: &'a [usize],
    /// Dense period code of every row.
    pub time: &'a [usize],
    pub df_resid: usize,
    /// Scale clustered estimates by `G/(G−1)·(n−1)/(n−k)`.
    pub small_sample: bool,
}

#[derive(Debug, Clone)]
pub struct CovarianceEstimate {
    pub matrix: Array2<f64>,
    /// Whether `matrix` is positive semi-definite up to rounding.
    pub psd: bool,
}

pub fn estimate_covariance(
    kind: CovarianceKind,
    inputs: &CovarianceInputs<'_>,
) -> Result<CovarianceEstimate, EstimationError> {
    let matrix = match kind {
        CovarianceKind::Unadjusted => {
            let ssr = inputs.resid.dot(&inputs.resid);
            inputs.bread * (ssr / inputs.df_resid as f64)
        }
        CovarianceKind::Robust => heteroskedastic(inputs),
        CovarianceKind::Clustered(ClusterBy::Entity) => {
            reject_singletons(inputs.entity)?;
            clustered(inputs, inputs.entity)
        }
        CovarianceKind::Clustered(ClusterBy::Time) => clustered(inputs, inputs.time),
        CovarianceKind::Clustered(ClusterBy::EntityTime) => {
            reject_singletons(inputs.entity)?;
            clustered(inputs, inputs.entity) + clustered(inputs, inputs.time)
                - heteroskedastic(inputs)
        }
    };
    let psd = is_psd(&matrix);
    if !psd {
        log::warn!("The {kind} coefficient covariance is not positive semi-definite.");
    }
    Ok(CovarianceEstimate { matrix, psd })
}

fn sandwich(bread: &Array2<f64>, meat: &Array2<f64>) -> Array2<f64> {
    bread.dot(meat).dot(bread)
}

fn heteroskedastic(inputs: &CovarianceInputs<'_>) -> Array2<f64> {
    let scores = &inputs.x * &inputs.resid.insert_axis(Axis(1));
    let meat = scores.t().dot(&scores);
    let (n, k) = inputs.x.dim();
    let scale = if inputs.small_sample && n > k {
        n as f64 / (n - k) as f64
    } else {
        1.0
    };
    sandwich(inputs.bread, &meat) * scale
}

fn clustered(inputs: &CovarianceInputs<'_>, codes: &[usize]) -> Array2<f64> {
    let (n, k) = inputs.x.dim();
    let n_clusters = codes.iter().max().map_or(0, |&max| max + 1);
    let mut scores = Array2::<f64>::zeros((n_clusters, k));
    for ((row, &e), &g) in inputs.x.outer_iter().zip(inputs.resid.iter()).zip(codes) {
        scores.row_mut(g).scaled_add(e, &row);
    }
    let meat = scores.t().dot(&scores);
    let scale = if inputs.small_sample && n_clusters > 1 && n > k {
        let g = n_clusters as f64;
        (g / (g - 1.0)) * ((n - 1) as f64 / (n - k) as f64)
    } else {
        1.0
    };
    sandwich(inputs.bread, &meat) * scale
}

fn reject_singletons(entity: &[usize]) -> Result<(), EstimationError> {
    let n_clusters = entity.iter().max().map_or(0, |&max| max + 1);
    let mut sizes = vec![0usize; n_clusters];
    for &g in entity {
        sizes[g] += 1;
    }
    let singletons = sizes.iter().filter(|&&size| size == 1).count();
    if singletons > 0 {
        return Err(EstimationError::SingletonCluster { singletons });
    }
    Ok(())
}
