//! # Lag Builder
//!
//! Two policies are supported:
//!
//! - [`LagMode::Positional`] shifts by row position inside each entity. When a
//!   firm skips a year, the "previous" value is simply the nearest earlier row
//!   that exists. This reproduces the historical outputs and is the default.
//! - [`LagMode::Calendar`] looks up the value exactly `lag` periods earlier on
//!   the time axis and yields a missing value when that period is absent.

use crate::index::{Panel, PanelError};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LagMode {
    #[default]
    Positional,
    Calendar,
}

impl fmt::Display for LagMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional => f.write_str("positional"),
            Self::Calendar => f.write_str("calendar"),
        }
    }
}

/// Lags `values` within each row range of `groups`. `times` must be sorted
/// ascending inside every group. A lag of zero returns the input unchanged.
pub fn lag_within_groups(
    values: ArrayView1<f64>,
    times: &[i64],
    groups: &[Range<usize>],
    lag: usize,
    mode: LagMode,
) -> Array1<f64> {
    if lag == 0 {
        return values.to_owned();
    }
    let mut lagged = Array1::from_elem(values.len(), f64::NAN);
    for group in groups {
        match mode {
            LagMode::Positional => {
                for row in (group.start + lag)..group.end {
                    lagged[row] = values[row - lag];
                }
            }
            LagMode::Calendar => {
                let span = &times[group.clone()];
                for row in group.clone() {
                    let target = times[row] - lag as i64;
                    if let Ok(offset) = span.binary_search(&target) {
                        lagged[row] = values[group.start + offset];
                    }
                }
            }
        }
    }
    lagged
}

/// Name given to the lagged copy of `column`.
pub fn lagged_name(column: &str, lag: usize) -> String {
    format!("{column}_lag{lag}")
}

impl Panel {
    /// The values of `column` lagged by `lag` periods within each entity.
    pub fn lagged(&self, column: &str, lag: usize, mode: LagMode) -> Result<Array1<f64>, PanelError> {
        let values = self.numeric_view(column)?;
        Ok(lag_within_groups(values, self.times(), self.groups(), lag, mode))
    }

    /// Returns a new panel carrying the lagged copy of each column in
    /// `columns`, stored under [`lagged_name`], plus the names used.
    pub fn with_lags(
        &self,
        columns: &[&str],
        lag: usize,
        mode: LagMode,
    ) -> Result<(Panel, Vec<String>), PanelError> {
        let mut panel = self.clone();
        let mut names = Vec::with_capacity(columns.len());
        for column in columns {
            let name = lagged_name(column, lag);
            panel = panel.with_numeric(&name, self.lagged(column, lag, mode)?)?;
            names.push(name);
        }
        Ok((panel, names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;
    use crate::index::PanelIndexer;
    use ndarray::array;

    fn single_firm(years: &[i64], values: &[f64]) -> (Array1<f64>, Vec<i64>, Vec<Range<usize>>) {
        (
            Array1::from(values.to_vec()),
            years.to_vec(),
            vec![0..years.len()],
        )
    }

    fn assert_same(actual: &Array1<f64>, expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            if e.is_nan() {
                assert!(a.is_nan(), "expected NaN, got {a}");
            } else {
                assert_eq!(a, e);
            }
        }
    }

    #[test]
    fn lag_zero_is_identity() {
        let (values, years, groups) = single_firm(&[2018, 2019, 2021], &[1.0, f64::NAN, 3.0]);
        for mode in [LagMode::Positional, LagMode::Calendar] {
            let lagged = lag_within_groups(values.view(), &years, &groups, 0, mode);
            assert_same(&lagged, &[1.0, f64::NAN, 3.0]);
        }
    }

    #[test]
    fn consecutive_years_shift_by_one_and_two() {
        let (values, years, groups) =
            single_firm(&[2018, 2019, 2020, 2021], &[10.0, 20.0, 30.0, 40.0]);
        for mode in [LagMode::Positional, LagMode::Calendar] {
            let one = lag_within_groups(values.view(), &years, &groups, 1, mode);
            assert_same(&one, &[f64::NAN, 10.0, 20.0, 30.0]);
            let two = lag_within_groups(values.view(), &years, &groups, 2, mode);
            assert_same(&two, &[f64::NAN, f64::NAN, 10.0, 20.0]);
        }
    }

    #[test]
    fn positional_mode_bridges_gaps() {
        let (values, years, groups) = single_firm(&[2018, 2020, 2021], &[10.0, 30.0, 40.0]);
        let lagged = lag_within_groups(values.view(), &years, &groups, 1, LagMode::Positional);
        assert_same(&lagged, &[f64::NAN, 10.0, 30.0]);
    }

    #[test]
    fn calendar_mode_leaves_gaps_missing() {
        let (values, years, groups) = single_firm(&[2018, 2020, 2021], &[10.0, 30.0, 40.0]);
        let lagged = lag_within_groups(values.view(), &years, &groups, 1, LagMode::Calendar);
        assert_same(&lagged, &[f64::NAN, f64::NAN, 30.0]);
        let two = lag_within_groups(values.view(), &years, &groups, 2, LagMode::Calendar);
        assert_same(&two, &[f64::NAN, 10.0, f64::NAN]);
    }

    #[test]
    fn lags_never_cross_entities() {
        let values = array![1.0, 2.0, 3.0, 4.0];
        let years = vec![2019, 2020, 2019, 2020];
        let groups = vec![0..2, 2..4];
        let lagged = lag_within_groups(values.view(), &years, &groups, 1, LagMode::Positional);
        assert_same(&lagged, &[f64::NAN, 1.0, f64::NAN, 3.0]);
    }

    #[test]
    fn panel_lags_add_named_columns() {
        let table = crate::index::tests::balanced_table(3, &[2018, 2019, 2020, 2021]);
        let table = table
            .with_column(
                "y",
                ColumnData::Numeric(Array1::from_iter((0..12).map(|v| v as f64))),
            )
            .unwrap();
        let panel = PanelIndexer::new(2)
            .index(&table, "Company_Code", "Year")
            .unwrap();
        let (lagged, names) = panel.with_lags(&["x", "y"], 1, LagMode::Positional).unwrap();
        assert_eq!(names, vec!["x_lag1".to_string(), "y_lag1".to_string()]);
        let x1 = lagged.numeric("x_lag1").unwrap();
        assert!(x1[0].is_nan());
        assert_eq!(x1[1], 0.0);
        assert!(panel.column("x_lag1").is_none());
    }
}
