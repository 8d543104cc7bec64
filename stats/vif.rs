//! Variance inflation factors.
//!
//! Each column is regressed on all the others by least squares (through the
//! SVD, so exactly collinear blocks do not fail) and `VIF = 1 / (1 − R²)`.
//! A perfect fit reports an infinite VIF.

use crate::index::{Panel, PanelError};
use crate::stats::estimate::EstimationError;
use ndarray::{Array1, Array2, ArrayView2};
use ndarray_linalg::LeastSquaresSvd;

/// `1 − R²` at or below this value is treated as a perfect fit.
const PERFECT_FIT: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct VifEntry {
    pub variable: String,
    pub vif: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VifTable {
    pub entries: Vec<VifEntry>,
    pub mean: f64,
    pub max: f64,
    pub nobs: usize,
}

/// The listed columns of `panel` as a matrix, keeping only rows where every
/// column is present.
pub fn complete_matrix<S: AsRef<str>>(panel: &Panel, columns: &[S]) -> Result<Array2<f64>, PanelError> {
    let data = columns
        .iter()
        .map(|name| panel.numeric(name.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    let rows: Vec<usize> = (0..panel.n_rows())
        .filter(|&row| data.iter().all(|column| column[row].is_finite()))
        .collect();
    Ok(Array2::from_shape_fn((rows.len(), data.len()), |(i, j)| {
        data[j][rows[i]]
    }))
}

/// VIF of every column of `x`. With `intercept` the auxiliary regressions
/// include a constant and R² is centred; without it R² is uncentred.
pub fn variance_inflation(
    x: ArrayView2<f64>,
    names: &[String],
    intercept: bool,
) -> Result<VifTable, EstimationError> {
    let (n, k) = x.dim();
    if k < 2 {
        return Err(EstimationError::TooFewColumns(k));
    }
    if n == 0 {
        return Err(EstimationError::EmptyDesign);
    }

    let mut entries = Vec::with_capacity(k);
    for (i, name) in names.iter().enumerate().take(k) {
        let target = x.column(i);
        let others: Vec<usize> = (0..k).filter(|&j| j != i).collect();
        let offset = usize::from(intercept);
        let design = Array2::from_shape_fn((n, others.len() + offset), |(r, c)| {
            if c < offset { 1.0 } else { x[[r, others[c - offset]]] }
        });
        let solution = design.least_squares(&target)?.solution;
        let residual: Array1<f64> = &target - &design.dot(&solution);
        let ssr = residual.dot(&residual);
        let tss = if intercept {
            let mean = target.mean().unwrap_or(0.0);
            target.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
        } else {
            target.dot(&target)
        };
        let vif = if tss <= 0.0 || ssr <= PERFECT_FIT * tss {
            f64::INFINITY
        } else {
            tss / ssr
        };
        entries.push(VifEntry {
            variable: name.clone(),
            vif,
        });
    }

    let mean = entries.iter().map(|e| e.vif).sum::<f64>() / entries.len() as f64;
    let max = entries.iter().map(|e| e.vif).fold(f64::NEG_INFINITY, f64::max);
    Ok(VifTable {
        entries,
        mean,
        max,
        nobs: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;
    use crate::index::PanelIndexer;
    use crate::index::tests::balanced_table;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn orthogonal_columns_have_unit_vif() {
        let x = array![
            [1.0, 1.0],
            [-1.0, 1.0],
            [1.0, -1.0],
            [-1.0, -1.0],
            [1.0, 1.0],
            [-1.0, 1.0],
            [1.0, -1.0],
            [-1.0, -1.0]
        ];
        let table = variance_inflation(x.view(), &names(&["a", "b"]), true).unwrap();
        for entry in &table.entries {
            assert_abs_diff_eq!(entry.vif, 1.0, epsilon = 1e-10);
        }
        assert_abs_diff_eq!(table.mean, 1.0, epsilon = 1e-10);
        assert_eq!(table.nobs, 8);
    }

    #[test]
    fn collinear_columns_have_infinite_vif() {
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [5.0, 10.0]];
        let table = variance_inflation(x.view(), &names(&["a", "b"]), true).unwrap();
        assert!(table.entries.iter().all(|e| e.vif.is_infinite()));
        assert!(table.max.is_infinite());
    }

    #[test]
    fn uncentred_variant_differs_from_centred() {
        let x = array![[1.0, 3.0], [2.0, 1.0], [3.0, 4.0], [4.0, 1.5], [5.0, 5.0]];
        let centred = variance_inflation(x.view(), &names(&["a", "b"]), true).unwrap();
        let uncentred = variance_inflation(x.view(), &names(&["a", "b"]), false).unwrap();
        assert!(centred.entries[0].vif >= 1.0);
        assert!(uncentred.entries[0].vif >= 1.0);
        assert!((centred.entries[0].vif - uncentred.entries[0].vif).abs() > 1e-6);
    }

    #[test]
    fn a_single_column_is_rejected() {
        let x = array![[1.0], [2.0]];
        let err = variance_inflation(x.view(), &names(&["a"]), true).unwrap_err();
        assert_eq!(err.kind(), "too_few_columns");
    }

    #[test]
    fn incomplete_rows_are_dropped() {
        let table = balanced_table(3, &[2018, 2019, 2020, 2021]);
        let mut z: Vec<f64> = (0..12).map(|v| (v * v % 5) as f64).collect();
        z[4] = f64::NAN;
        let table = table
            .with_column("z", ColumnData::Numeric(Array1::from(z)))
            .unwrap();
        let panel = PanelIndexer::new(2)
            .index(&table, "Company_Code", "Year")
            .unwrap();
        let x = complete_matrix(&panel, &["x", "z"]).unwrap();
        assert_eq!(x.dim(), (11, 2));
    }
}
