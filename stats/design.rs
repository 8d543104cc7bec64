//! Design matrices: one dependent column and K regressors, restricted to the
//! panel rows where all K+1 values are present and to entities that keep at
//! least two such rows.

use crate::index::{Panel, PanelError, check_shape};
use ndarray::{Array1, Array2, Axis};
use std::ops::Range;

#[derive(Debug, Clone)]
pub struct DesignMatrix {
    dependent: String,
    regressors: Vec<String>,
    y: Array1<f64>,
    x: Array2<f64>,
    entity: Vec<usize>,
    entity_labels: Vec<String>,
    time: Vec<usize>,
    periods: Vec<i64>,
    groups: Vec<Range<usize>>,
    complete_periods: usize,
}

impl DesignMatrix {
    /// Builds the design for `dependent ~ regressors` over `panel`.
    ///
    /// Rows with any missing value are dropped first, then entities left with
    /// a single row. The result may be empty; use
    /// [`DesignMatrix::check_estimable`] before fitting.
    pub fn from_panel<S: AsRef<str>>(
        panel: &Panel,
        dependent: &str,
        regressors: &[S],
    ) -> Result<Self, PanelError> {
        let y = panel.numeric(dependent)?;
        let columns = regressors
            .iter()
            .map(|name| panel.numeric(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let complete: Vec<usize> = (0..panel.n_rows())
            .filter(|&row| y[row].is_finite() && columns.iter().all(|c| c[row].is_finite()))
            .collect();

        let mut complete_times: Vec<i64> = complete.iter().map(|&row| panel.times()[row]).collect();
        complete_times.sort_unstable();
        complete_times.dedup();

        let codes = panel.entity_codes();
        let mut per_entity = vec![0usize; panel.n_entities()];
        for &row in &complete {
            per_entity[codes[row]] += 1;
        }
        let rows: Vec<usize> = complete
            .into_iter()
            .filter(|&row| per_entity[codes[row]] >= 2)
            .collect();

        let kept = panel.select_rows(&rows);
        let mut x = Array2::<f64>::zeros((rows.len(), columns.len()));
        for (j, column) in columns.iter().enumerate() {
            for (i, &row) in rows.iter().enumerate() {
                x[[i, j]] = column[row];
            }
        }

        let mut periods: Vec<i64> = kept.times().to_vec();
        periods.sort_unstable();
        periods.dedup();
        let time = kept
            .times()
            .iter()
            .map(|t| periods.binary_search(t).unwrap_or_default())
            .collect();

        Ok(Self {
            dependent: dependent.to_string(),
            regressors: regressors.iter().map(|s| s.as_ref().to_string()).collect(),
            y: rows.iter().map(|&row| y[row]).collect(),
            x,
            entity: kept.entity_codes().to_vec(),
            entity_labels: kept.entity_labels().to_vec(),
            time,
            periods,
            groups: kept.groups().to_vec(),
            complete_periods: complete_times.len(),
        })
    }

    /// Fails with [`PanelError::Insufficient`] when the usable rows do not
    /// form an estimable panel.
    pub fn check_estimable(&self) -> Result<(), PanelError> {
        check_shape(self.n_entities(), self.n_periods(), self.nobs())
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn regressors(&self) -> &[String] {
        &self.regressors
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn nobs(&self) -> usize {
        self.y.len()
    }

    pub fn n_regressors(&self) -> usize {
        self.regressors.len()
    }

    pub fn n_entities(&self) -> usize {
        self.entity_labels.len()
    }

    pub fn n_periods(&self) -> usize {
        self.periods.len()
    }

    /// Dense entity code of every row.
    pub fn entity_codes(&self) -> &[usize] {
        &self.entity
    }

    pub fn entity_labels(&self) -> &[String] {
        &self.entity_labels
    }

    /// Dense period code of every row, indexing [`DesignMatrix::periods`].
    pub fn time_codes(&self) -> &[usize] {
        &self.time
    }

    /// Distinct periods, ascending.
    pub fn periods(&self) -> &[i64] {
        &self.periods
    }

    /// Distinct periods among the complete rows, counted before entities
    /// with a single complete row were dropped.
    pub fn complete_periods(&self) -> usize {
        self.complete_periods
    }

    /// Row range of every entity.
    pub fn groups(&self) -> &[Range<usize>] {
        &self.groups
    }

    /// Calendar period of every row.
    pub fn row_times(&self) -> Vec<i64> {
        self.time.iter().map(|&t| self.periods[t]).collect()
    }

    /// Keeps the regressors at the listed positions.
    pub fn select_regressors(&self, keep: &[usize]) -> Self {
        Self {
            regressors: keep.iter().map(|&j| self.regressors[j].clone()).collect(),
            x: self.x.select(Axis(1), keep),
            ..self.clone()
        }
    }

    /// Drops regressors whose population standard deviation is numerically
    /// zero and returns the names removed.
    pub fn without_constant_columns(&self) -> (Self, Vec<String>) {
        let mut keep = Vec::new();
        let mut dropped = Vec::new();
        for (j, column) in self.x.axis_iter(Axis(1)).enumerate() {
            if column.std(0.0) <= 1e-8 {
                dropped.push(self.regressors[j].clone());
            } else {
                keep.push(j);
            }
        }
        (self.select_regressors(&keep), dropped)
    }
}
